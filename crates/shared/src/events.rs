//! Server-sent event framing for observer events.
//!
//! Each [`ObserverEvent`] maps to exactly one named SSE event with a JSON
//! body. Transports must not reorder or merge frames.

use serde::Serialize;
use serde_json::{json, Value};

use genstream_domain::ObserverEvent;

pub const EVENT_STATE: &str = "state";
pub const EVENT_TEXT: &str = "text";
pub const EVENT_ASSET: &str = "asset";
pub const EVENT_DONE: &str = "done";
pub const EVENT_ERROR: &str = "error";

/// One wire frame: SSE `event:` name plus `data:` JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: Value,
}

impl SseFrame {
    pub fn data_string(&self) -> String {
        self.data.to_string()
    }
}

impl From<&ObserverEvent> for SseFrame {
    fn from(event: &ObserverEvent) -> Self {
        let (name, data) = match event {
            ObserverEvent::State(snapshot) => (
                EVENT_STATE,
                serde_json::to_value(snapshot).unwrap_or(Value::Null),
            ),
            ObserverEvent::Text { text } => (EVENT_TEXT, json!({ "text": text })),
            ObserverEvent::Asset { asset } => (
                EVENT_ASSET,
                serde_json::to_value(asset).unwrap_or(Value::Null),
            ),
            ObserverEvent::Done { text, asset } => {
                (EVENT_DONE, json!({ "text": text, "asset": asset }))
            }
            ObserverEvent::Error { message } => (EVENT_ERROR, json!({ "message": message })),
        };
        SseFrame { event: name, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genstream_domain::TaskSnapshot;

    #[test]
    fn state_frame_carries_snapshot() {
        let frame = SseFrame::from(&ObserverEvent::State(TaskSnapshot::initial()));
        assert_eq!(frame.event, "state");
        assert_eq!(frame.data["isDone"], json!(false));
    }

    #[test]
    fn terminal_frames() {
        let done = SseFrame::from(&ObserverEvent::Done {
            text: Some("final".into()),
            asset: None,
        });
        assert_eq!(done.event, "done");
        assert_eq!(done.data_string(), r#"{"asset":null,"text":"final"}"#);

        let error = SseFrame::from(&ObserverEvent::error("backend unavailable"));
        assert_eq!(error.event, "error");
        assert_eq!(error.data["message"], json!("backend unavailable"));
    }
}
