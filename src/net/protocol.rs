//! Stratum-style wire protocol
//!
//! Line-delimited JSON-RPC as CryptoNote miners speak it: requests carry
//! `id`/`method`/`params`, replies always carry both `error` and `result`
//! (one of them null), and new jobs are pushed as `job` notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound request line. Fields are optional so a malformed line can be
/// inspected before being dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub id: Option<Value>,
    pub method: Option<String>,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// An outbound reply. Both `error` and `result` are always present on the
/// wire; miners key off whichever is non-null.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub id: Value,
    pub jsonrpc: &'static str,
    pub error: Option<RpcError>,
    pub result: Option<Value>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            jsonrpc: "2.0",
            error: None,
            result: Some(result),
        }
    }

    pub fn err(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            jsonrpc: "2.0",
            error: Some(RpcError {
                code: -1,
                message: message.into(),
            }),
            result: None,
        }
    }
}

/// A server-initiated notification; `id` is null on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification<T> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: T,
}

impl<T: Serialize> RpcNotification<T> {
    pub fn job(params: T) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "job",
            params,
        }
    }
}

/// Job description pushed to miners and embedded in login replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobPayload {
    pub blob: String,
    pub job_id: String,
    pub target: String,
    pub algo: String,
    pub height: u64,
    pub seed_hash: String,
    pub next_seed_hash: String,
}

impl JobPayload {
    /// The blank job sent when a miner is already on the current height
    /// with no difficulty change pending.
    pub fn empty() -> Self {
        Self {
            blob: String::new(),
            job_id: String::new(),
            target: String::new(),
            algo: String::new(),
            height: 0,
            seed_hash: String::new(),
            next_seed_hash: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.job_id.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginParams {
    pub login: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetJobParams {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitParams {
    pub id: String,
    pub job_id: String,
    pub nonce: String,
    pub result: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepalivedParams {
    pub id: String,
}

/// Login reply body.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub id: String,
    pub job: JobPayload,
    pub status: &'static str,
}

/// Serialize a frame to one newline-terminated wire line.
pub fn to_line<T: Serialize>(frame: &T) -> String {
    let mut line = serde_json::to_string(frame).unwrap_or_default();
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_response_carries_null_error() {
        let line = to_line(&RpcResponse::ok(json!(1), json!({"status": "OK"})));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["error"], Value::Null);
        assert_eq!(value["result"]["status"], "OK");
    }

    #[test]
    fn test_err_response_carries_null_result() {
        let line = to_line(&RpcResponse::err(json!(7), "Low difficulty share"));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["error"]["code"], -1);
        assert_eq!(value["error"]["message"], "Low difficulty share");
        assert_eq!(value["result"], Value::Null);
    }

    #[test]
    fn test_job_notification_shape() {
        let mut job = JobPayload::empty();
        job.job_id = "abc".into();
        job.target = "ffffffff".into();
        let line = to_line(&RpcNotification::job(job));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["method"], "job");
        assert_eq!(value["params"]["job_id"], "abc");
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_request_tolerates_missing_fields() {
        let req: RpcRequest = serde_json::from_str(r#"{"id":1}"#).unwrap();
        assert!(req.method.is_none());
        assert!(req.params.is_none());
    }

    #[test]
    fn test_submit_params_parse() {
        let raw = json!({
            "id": "s1",
            "job_id": "j1",
            "nonce": "deadbeef",
            "result": "ab".repeat(32),
        });
        let params: SubmitParams = serde_json::from_value(raw).unwrap();
        assert_eq!(params.nonce, "deadbeef");
    }
}
