//! Stake-weighted committee sampling and diversity-fallback selection.

use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use synod_types::error::ConsensusError;
use synod_types::validator::Validator;

/// Stateless selection over a validator list. Randomness is a fresh thread
/// RNG per call; no deterministic seed is involved.
pub struct ValidatorPool;

impl ValidatorPool {
    /// Draws `count` distinct validators without replacement, with
    /// probability proportional to `stake / total_stake`. The first drawn
    /// element is the leader; the rest are committee validators in draw
    /// order. `count` is clamped to the number of eligible validators, so
    /// `count >= len` yields a full randomized permutation.
    ///
    /// Zero-stake validators are excluded from the distribution entirely,
    /// not merely down-weighted. An empty eligible pool is a fatal
    /// configuration error for the caller.
    pub fn select(nodes: &[Validator], count: usize) -> Result<Vec<Validator>, ConsensusError> {
        let mut eligible: Vec<&Validator> = nodes.iter().filter(|v| v.stake > 0).collect();
        if eligible.is_empty() {
            return Err(ConsensusError::EmptyPool);
        }
        let target = count.min(eligible.len());
        let mut rng = thread_rng();
        let mut picked = Vec::with_capacity(target);
        for _ in 0..target {
            let total: u128 = eligible.iter().map(|v| u128::from(v.stake)).sum();
            let mut ticket = rng.gen_range(0..total);
            let mut chosen = 0usize;
            for (i, v) in eligible.iter().enumerate() {
                let weight = u128::from(v.stake);
                if ticket < weight {
                    chosen = i;
                    break;
                }
                ticket -= weight;
            }
            picked.push(eligible.remove(chosen).clone());
        }
        Ok(picked)
    }

    /// Two-tier diversity fallback: prefer a different provider, then the
    /// same provider with a different model, uniformly at random within a
    /// tier. Identity is compared by address, never by object identity.
    pub fn select_fallback(primary: &Validator, all: &[Validator]) -> Option<Validator> {
        let others: Vec<&Validator> = all
            .iter()
            .filter(|v| v.address != primary.address)
            .collect();

        let mut rng = thread_rng();

        let different_provider: Vec<&&Validator> = others
            .iter()
            .filter(|v| v.provider.provider != primary.provider.provider)
            .collect();
        if let Some(pick) = different_provider.choose(&mut rng) {
            return Some((***pick).clone());
        }

        let different_model: Vec<&&Validator> = others
            .iter()
            .filter(|v| {
                v.provider.provider == primary.provider.provider
                    && v.provider.model != primary.provider.model
            })
            .collect();
        different_model.choose(&mut rng).map(|pick| (***pick).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;
    use synod_types::validator::{Address, LlmProvider, PluginConfig};

    fn validator(address: &str, stake: u64, provider: &str, model: &str) -> Validator {
        Validator {
            address: Address::from(address),
            stake,
            provider: LlmProvider {
                provider: provider.to_string(),
                model: model.to_string(),
                config: BTreeMap::new(),
                plugin: provider.to_string(),
                plugin_config: PluginConfig {
                    api_key_env_var: format!("{}_API_KEY", provider.to_uppercase()),
                    api_url: None,
                },
            },
        }
    }

    #[test]
    fn empty_pool_is_fatal() {
        let err = ValidatorPool::select(&[], 3).unwrap_err();
        assert!(matches!(err, ConsensusError::EmptyPool));
    }

    #[test]
    fn zero_stake_validators_are_excluded_entirely() {
        let nodes = vec![
            validator("a", 0, "openai", "gpt-4o"),
            validator("b", 5, "openai", "gpt-4o"),
        ];
        for _ in 0..20 {
            let picked = ValidatorPool::select(&nodes, 2).unwrap();
            assert_eq!(picked.len(), 1);
            assert_eq!(picked[0].address, Address::from("b"));
        }
    }

    #[test]
    fn oversized_count_returns_a_full_permutation() {
        for n in 1..=6u64 {
            let nodes: Vec<Validator> = (0..n)
                .map(|i| validator(&format!("v{}", i), i + 1, "openai", "gpt-4o"))
                .collect();
            let picked = ValidatorPool::select(&nodes, (n as usize) + 3).unwrap();
            assert_eq!(picked.len(), n as usize);
            let addresses: BTreeSet<_> = picked.iter().map(|v| v.address.clone()).collect();
            assert_eq!(addresses.len(), n as usize);
        }
    }

    #[test]
    fn sampling_heavily_favors_high_stake() {
        let nodes = vec![
            validator("heavy", 100, "openai", "gpt-4o"),
            validator("light", 1, "openai", "gpt-4o"),
        ];
        let mut heavy_hits = 0;
        for _ in 0..100 {
            let picked = ValidatorPool::select(&nodes, 1).unwrap();
            if picked[0].address == Address::from("heavy") {
                heavy_hits += 1;
            }
        }
        assert!(heavy_hits > 90, "heavy node selected only {} times", heavy_hits);
    }

    #[test]
    fn leader_frequency_tracks_stake_proportion() {
        let nodes = vec![
            validator("s1", 1, "openai", "gpt-4o"),
            validator("s2", 2, "openai", "gpt-4o"),
            validator("s3", 3, "openai", "gpt-4o"),
        ];
        let trials = 6000;
        let mut counts: BTreeMap<Address, u32> = BTreeMap::new();
        for _ in 0..trials {
            let picked = ValidatorPool::select(&nodes, 1).unwrap();
            *counts.entry(picked[0].address.clone()).or_insert(0) += 1;
        }
        let freq = |addr: &str| {
            f64::from(*counts.get(&Address::from(addr)).unwrap_or(&0)) / f64::from(trials)
        };
        // Expected 1/6, 2/6, 3/6 with a generous statistical tolerance.
        assert!((freq("s1") - 1.0 / 6.0).abs() < 0.05);
        assert!((freq("s2") - 2.0 / 6.0).abs() < 0.05);
        assert!((freq("s3") - 3.0 / 6.0).abs() < 0.05);
    }

    #[test]
    fn fallback_prefers_a_different_provider() {
        let primary = validator("a", 1, "openai", "gpt-4o");
        let all = vec![
            primary.clone(),
            validator("b", 1, "openai", "gpt-4-mini"),
            validator("c", 1, "anthropic", "claude-3"),
        ];
        for _ in 0..20 {
            let pick = ValidatorPool::select_fallback(&primary, &all).unwrap();
            assert_eq!(pick.address, Address::from("c"));
        }
    }

    #[test]
    fn fallback_falls_back_to_a_different_model() {
        let primary = validator("a", 1, "openai", "gpt-4o");
        let all = vec![primary.clone(), validator("b", 1, "openai", "gpt-4-mini")];
        let pick = ValidatorPool::select_fallback(&primary, &all).unwrap();
        assert_eq!(pick.address, Address::from("b"));
    }

    #[test]
    fn fallback_absent_when_no_diversity_exists() {
        let primary = validator("a", 1, "openai", "gpt-4o");
        assert!(ValidatorPool::select_fallback(&primary, &[primary.clone()]).is_none());

        let twin = validator("b", 1, "openai", "gpt-4o");
        assert!(
            ValidatorPool::select_fallback(&primary, &[primary.clone(), twin]).is_none()
        );
    }
}
