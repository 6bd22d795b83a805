use chat_backend::{Attachment, StartStreamRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST …/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub text: String,
    pub metadata: Value,
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl From<&StartStreamRequest> for MessageBody {
    fn from(request: &StartStreamRequest) -> Self {
        Self {
            text: request.text.clone(),
            metadata: if request.metadata.is_null() {
                Value::Object(Default::default())
            } else {
                request.metadata.clone()
            },
            attachments: request.attachments.clone(),
            session_id: request
                .session_id
                .as_deref()
                .map(str::trim)
                .filter(|session_id| !session_id.is_empty())
                .map(str::to_owned),
        }
    }
}

/// Body of `POST …/sessions/{session_id}/resume`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeBody {
    pub cursor: String,
}
