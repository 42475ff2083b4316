//! VM client seam. The engine talks to the contract VM over this trait so
//! rounds can be driven against a mock in tests and against the HTTP
//! execution service in production.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use synod_types::error::VmError;
use synod_types::transaction::{ExecutionReceipt, RunBy, Vote};
use synod_types::validator::HostData;

/// One execution call: the contract, its current state, and the call frame.
/// Validator re-executions carry the leader's receipt so the VM can compare
/// equivalence for non-deterministic sections.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRequest {
    pub contract_code: String,
    pub encoded_state: String,
    pub function_name: String,
    pub args: Vec<serde_json::Value>,
    pub run_by: RunBy,
    pub host_data: HostData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_receipt: Option<ExecutionReceipt>,
}

/// What comes back from a successful execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionResponse {
    pub vote: Vote,
    /// New encoded contract state after the call.
    pub contract_state: String,
    /// Execution result payload, carried verbatim into the receipt.
    pub result: serde_json::Value,
}

#[async_trait]
pub trait VmClient: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse, VmError>;
}

/// Error body shape the execution service returns on a failed call. The
/// payload is carried verbatim so callers see exactly what the VM reported.
#[derive(Debug, Deserialize)]
struct VmErrorBody {
    error: serde_json::Value,
}

/// HTTP client against the execution service.
pub struct HttpVmClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpVmClient {
    pub fn new(endpoint: impl Into<String>, call_timeout: Duration) -> Result<Self, VmError> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| VmError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl VmClient for HttpVmClient {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse, VmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VmError::Timeout
                } else {
                    VmError::Transport(e.to_string())
                }
            })?;

        if response.status().is_success() {
            response
                .json::<ExecutionResponse>()
                .await
                .map_err(decode_error)
        } else {
            let body = response.json::<VmErrorBody>().await.map_err(decode_error)?;
            Err(VmError::Execution(body.error))
        }
    }
}

/// The overall request timeout can also fire while the body is being read;
/// that is still a timeout, not a malformed response.
fn decode_error(e: reqwest::Error) -> VmError {
    if e.is_timeout() {
        VmError::Timeout
    } else {
        VmError::Decode(e.to_string())
    }
}

/// Scripted VM used across this crate's tests. Behaviors are keyed by the
/// caller's address; a repeated `on` for the same address queues behaviors
/// that are consumed in order, with the last one sticky. `on_validator`
/// overrides the behavior for re-execution calls only (those carrying a
/// leader receipt), so a node can answer differently depending on its role
/// in the round.
#[cfg(test)]
pub(crate) struct MockVm {
    behaviors: std::sync::Mutex<
        std::collections::BTreeMap<String, std::collections::VecDeque<Result<ExecutionResponse, VmError>>>,
    >,
    validator_behaviors:
        std::sync::Mutex<std::collections::BTreeMap<String, Result<ExecutionResponse, VmError>>>,
    calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockVm {
    pub(crate) fn new() -> Self {
        Self {
            behaviors: std::sync::Mutex::new(std::collections::BTreeMap::new()),
            validator_behaviors: std::sync::Mutex::new(std::collections::BTreeMap::new()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn on(&self, address: &str, behavior: Result<ExecutionResponse, VmError>) {
        self.behaviors
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push_back(behavior);
    }

    pub(crate) fn on_validator(&self, address: &str, behavior: Result<ExecutionResponse, VmError>) {
        self.validator_behaviors
            .lock()
            .unwrap()
            .insert(address.to_string(), behavior);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn replay(behavior: &Result<ExecutionResponse, VmError>) -> Result<ExecutionResponse, VmError> {
        match behavior {
            Ok(response) => Ok(response.clone()),
            Err(VmError::Timeout) => Err(VmError::Timeout),
            Err(VmError::Execution(v)) => Err(VmError::Execution(v.clone())),
            Err(VmError::Transport(s)) => Err(VmError::Transport(s.clone())),
            Err(VmError::Decode(s)) => Err(VmError::Decode(s.clone())),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl VmClient for MockVm {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse, VmError> {
        let address = request.host_data.address.to_string();
        self.calls.lock().unwrap().push(address.clone());
        if request.leader_receipt.is_some() {
            if let Some(behavior) = self.validator_behaviors.lock().unwrap().get(&address) {
                return Self::replay(behavior);
            }
        }
        let mut behaviors = self.behaviors.lock().unwrap();
        let queue = behaviors
            .get_mut(&address)
            .unwrap_or_else(|| panic!("no behavior programmed for {}", address));
        if queue.len() > 1 {
            queue
                .pop_front()
                .map(|b| Self::replay(&b))
                .unwrap_or_else(|| panic!("behavior queue drained for {}", address))
        } else {
            queue
                .front()
                .map(Self::replay)
                .unwrap_or_else(|| panic!("no behavior programmed for {}", address))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_types::validator::{studio_llm_id, Address};

    fn sample_request() -> ExecutionRequest {
        let addr = Address::from("a");
        ExecutionRequest {
            contract_code: "code".into(),
            encoded_state: "state".into(),
            function_name: "transfer".into(),
            args: vec![serde_json::json!(5)],
            run_by: RunBy::Leader,
            host_data: HostData {
                studio_llm_id: studio_llm_id(&addr),
                address: addr,
                mock_response: None,
                custom_plugin_data: None,
                fallback_llm_id: None,
            },
            leader_receipt: None,
        }
    }

    #[test]
    fn request_serializes_without_absent_leader_receipt() {
        let value = serde_json::to_value(sample_request()).unwrap();
        assert!(value.get("leader_receipt").is_none());
        assert_eq!(value["run_by"], "leader");
        assert_eq!(value["host_data"]["studio_llm_id"], "node-a");
    }

    #[tokio::test]
    async fn timeout_during_body_read_maps_to_timeout() {
        use std::io::{Read, Write};

        // Answers with complete headers, then stalls the promised body so
        // the request timeout fires during the body read.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n",
                );
                let _ = stream.flush();
                std::thread::sleep(Duration::from_secs(1));
            }
        });

        let client =
            HttpVmClient::new(format!("http://{}", addr), Duration::from_millis(250)).unwrap();
        let err = client.execute(sample_request()).await.unwrap_err();
        assert!(matches!(err, VmError::Timeout), "got {:?}", err);
    }
}
