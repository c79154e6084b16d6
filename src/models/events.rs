use serde::{ Serialize, Deserialize };

/// Events relayed to a streaming caller, in emission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "session")] Session {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "thinking")] Thinking {
        content: String,
    },
    #[serde(rename = "content")] Content {
        content: String,
    },
    #[serde(rename = "done")] Done {
        content: String,
    },
    #[serde(rename = "error")] Error {
        error: String,
    },
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done { .. } | ChatEvent::Error { .. })
    }
}
