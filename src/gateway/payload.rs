//! Usage: Typed request envelope (known fields + opaque remainder).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The gateway only understands `model`, `stream`, and `messages`; every
/// other top-level field is carried opaquely and re-emitted verbatim so
/// provider-specific extensions survive the proxy hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Value>>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ChatPayload {
    pub(crate) fn parse(body: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(body).map_err(|e| format!("SEC_INVALID_INPUT: invalid json: {e}"))
    }

    /// The client-supplied qualified identifier, if present and non-empty.
    pub(crate) fn client_model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    pub(crate) fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub(crate) fn set_model(&mut self, model: &str) {
        self.model = Some(model.to_string());
    }

    pub(crate) fn force_non_streaming(&mut self) {
        self.stream = Some(false);
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, String> {
        serde_json::to_vec(self).map_err(|e| format!("SYSTEM_ERROR: failed to serialize body: {e}"))
    }
}
