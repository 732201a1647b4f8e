use serde::{Deserialize, Serialize};

/// Body of `POST /chat/stream`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub max_tokens: Option<i32>,
}

/// Query string of `GET /rp`.
#[derive(Debug, Deserialize, Serialize)]
pub struct RpQuery {
    pub user_input: String,
    pub max_tokens: Option<i32>,
}

/// Body posted to llama-server's `/completion` endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub stream: bool,
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_predict: Option<i32>,
}

impl CompletionRequest {
    pub fn streaming(prompt: String, stop: Vec<String>, n_predict: Option<i32>) -> Self {
        CompletionRequest {
            prompt,
            stream: true,
            stop,
            n_predict,
        }
    }
}

/// Payload of one `data: ` event. Every other field the backend sends is ignored.
#[derive(Debug, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Active,
    Down,
}

impl From<bool> for BackendStatus {
    fn from(ready: bool) -> Self {
        if ready {
            BackendStatus::Active
        } else {
            BackendStatus::Down
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServerHealth {
    pub status: &'static str,
    pub llama: BackendStatus,
}

#[derive(Debug, Serialize)]
pub struct CliHealth {
    pub status: &'static str,
    pub model: String,
    pub default_max_tokens: i32,
}
