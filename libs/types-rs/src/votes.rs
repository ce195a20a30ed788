use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The shape a signed vote must have to be accepted for submission.
///
/// The server only checks that the fields are present and non-empty. The
/// payload is forwarded to the ledger exactly as received, so that the
/// signature it carries can be verified by the chaincode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VotePayload {
    pub vote: String,
    pub signature: String,
    pub constituency: String,

    /// Client clock at signing time. Any non-null JSON value is accepted.
    #[serde(default)]
    pub timestamp: Value,
}

impl VotePayload {
    /// Parses `raw` and checks that every field is non-empty.
    pub fn validate(raw: &[u8]) -> Result<Self, String> {
        let payload: Self = serde_json::from_slice(raw).map_err(|e| e.to_string())?;

        for (name, value) in [
            ("vote", &payload.vote),
            ("signature", &payload.signature),
            ("constituency", &payload.constituency),
        ] {
            if value.trim().is_empty() {
                return Err(format!("missing {name}"));
            }
        }

        match &payload.timestamp {
            Value::Null => return Err("missing timestamp".to_owned()),
            Value::String(timestamp) if timestamp.trim().is_empty() => {
                return Err("missing timestamp".to_owned())
            }
            _ => {}
        }

        Ok(payload)
    }
}
