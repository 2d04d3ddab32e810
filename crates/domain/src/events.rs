//! Bus messages, channel naming and observer-facing events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::snapshot::{AssetRef, ErrorInfo, TaskSnapshot};

const CHANNEL_PREFIX: &str = "gemini-task";

/// The four logical channels scoped to each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskChannel {
    Text,
    Asset,
    Done,
    Error,
}

impl TaskChannel {
    pub const ALL: [TaskChannel; 4] = [
        TaskChannel::Text,
        TaskChannel::Asset,
        TaskChannel::Done,
        TaskChannel::Error,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            TaskChannel::Text => "text",
            TaskChannel::Asset => "asset",
            TaskChannel::Done => "done",
            TaskChannel::Error => "error",
        }
    }

    /// Channel name for a task: `gemini-task:{task_id}:{suffix}`.
    pub fn name(&self, task_id: TaskId) -> String {
        format!("{CHANNEL_PREFIX}:{task_id}:{}", self.suffix())
    }

    /// Every channel name belonging to a task.
    pub fn names_for(task_id: TaskId) -> Vec<String> {
        Self::ALL.iter().map(|c| c.name(task_id)).collect()
    }
}

impl fmt::Display for TaskChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Transient message published by the worker. Never replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BusMessage {
    /// A single fragment, not the aggregate.
    Text { text: String },
    Asset { asset: AssetRef },
    Done,
    Error(ErrorInfo),
}

impl BusMessage {
    pub fn channel(&self) -> TaskChannel {
        match self {
            BusMessage::Text { .. } => TaskChannel::Text,
            BusMessage::Asset { .. } => TaskChannel::Asset,
            BusMessage::Done => TaskChannel::Done,
            BusMessage::Error(_) => TaskChannel::Error,
        }
    }
}

/// One element of the ordered, terminating sequence handed to an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    State(TaskSnapshot),
    Text {
        text: String,
    },
    Asset {
        asset: AssetRef,
    },
    Done {
        text: Option<String>,
        asset: Option<AssetRef>,
    },
    Error {
        message: String,
    },
}

impl ObserverEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ObserverEvent::Error {
            message: ErrorInfo::new(message).message,
        }
    }

    /// The terminal event equivalent to a terminal snapshot, if it is one.
    pub fn terminal_from(snapshot: &TaskSnapshot) -> Option<Self> {
        if !snapshot.is_done {
            return None;
        }
        Some(match &snapshot.error {
            Some(error) => ObserverEvent::error(error.message.clone()),
            None => ObserverEvent::Done {
                text: snapshot.text.clone(),
                asset: snapshot.asset.clone(),
            },
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ObserverEvent::Done { .. } | ObserverEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_scoped_to_the_task() {
        let task_id = TaskId::new();
        let names = TaskChannel::names_for(task_id);
        assert_eq!(
            names,
            vec![
                format!("gemini-task:{task_id}:text"),
                format!("gemini-task:{task_id}:asset"),
                format!("gemini-task:{task_id}:done"),
                format!("gemini-task:{task_id}:error"),
            ]
        );
        assert_eq!(BusMessage::Done.channel().name(task_id), names[2]);
    }

    #[test]
    fn bus_message_wire_shape() {
        let json = serde_json::to_value(BusMessage::Text { text: "ab".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "text", "text": "ab" }));

        let error = BusMessage::Error(ErrorInfo::new("quota exceeded"));
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(serde_json::from_str::<BusMessage>(&json).unwrap(), error);
    }

    #[test]
    fn terminal_event_follows_snapshot_outcome() {
        assert_eq!(ObserverEvent::terminal_from(&TaskSnapshot::initial()), None);
        let done = TaskSnapshot::succeeded(Some("all".into()), None);
        assert_eq!(
            ObserverEvent::terminal_from(&done),
            Some(ObserverEvent::Done {
                text: Some("all".into()),
                asset: None
            })
        );
        let failed = TaskSnapshot::failed(None, None, ErrorInfo::new("nope"));
        assert_eq!(
            ObserverEvent::terminal_from(&failed),
            Some(ObserverEvent::Error {
                message: "nope".into()
            })
        );
    }
}
