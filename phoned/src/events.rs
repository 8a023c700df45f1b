//! Messages flowing into the orchestrator and notifications flowing out.
//!
//! Trackers never call the orchestrator. They push [`Event`]s into one
//! inbound channel: tracker state changes, completions of spawned remote
//! calls, timer expiries and public method calls all arrive the same way
//! and are handled one at a time.

use std::collections::HashMap;

use phoned_dbus::{BusResult, MacAddress, ObjectInfo, PropMap};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Correlation id of a spawned remote call.
pub type OpId = u64;

/// Remote calls in flight, keyed by correlation id.
#[derive(Debug)]
pub struct PendingOps<T> {
    next: OpId,
    ops: HashMap<OpId, T>,
}

impl<T> Default for PendingOps<T> {
    fn default() -> Self {
        Self {
            next: 1,
            ops: HashMap::new(),
        }
    }
}

impl<T> PendingOps<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, op: T) -> OpId {
        let id = self.next;
        self.next += 1;
        self.ops.insert(id, op);
        id
    }

    pub fn take(&mut self, id: OpId) -> Option<T> {
        self.ops.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug)]
pub enum Event {
    Adapter(AdapterEvent),
    Modem(ModemEvent),
    Transfer(TransferEvent),
    ModemReply(OpId, ModemReply),
    TransferReply(OpId, BusResult<String>),
    Timer(TimerEvent),
    Command(Command),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Added(String),
    Removed(String),
    Powered(bool),
    /// A device finished pairing.
    DeviceCreated(String),
    DeviceRemoved(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModemEvent {
    /// oFono announced a modem for this remote device.
    Added(MacAddress),
    Powered(bool),
    SetPoweredFailed(String),
    CallChanged { state: String, line_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    SessionCreated(String),
    SessionFailed(String),
    SessionRemoved,
    Stalled,
    SynchronizationDone,
    ContactsChanged,
    CallHistoryChanged,
    CallHistoryEntryAdded(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    /// Stall check armed for one transfer path.
    StallCheck(String),
    ModemWatchdog,
    CallHistoryRefresh,
}

/// Completion payloads of modem tracker calls.
#[derive(Debug)]
pub enum ModemReply {
    Objects(BusResult<Vec<ObjectInfo>>),
    Properties(BusResult<PropMap>),
    Unit(BusResult<()>),
}

/// Public method calls, answered through their oneshot.
#[derive(Debug)]
pub enum Command {
    SelectRemoteDevice {
        address: String,
        reply: oneshot::Sender<Result<()>>,
    },
    GetSelectedRemoteDevice {
        reply: oneshot::Sender<String>,
    },
    UnselectRemoteDevice {
        reply: oneshot::Sender<()>,
    },
    Dial {
        number: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Answer {
        reply: oneshot::Sender<Result<()>>,
    },
    Hangup {
        reply: oneshot::Sender<Result<()>>,
    },
    Mute {
        muted: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    ActiveCall {
        reply: oneshot::Sender<CallSnapshot>,
    },
    Synchronize {
        reply: oneshot::Sender<Result<()>>,
    },
    GetContacts {
        count: u32,
        reply: oneshot::Sender<String>,
    },
    GetCallHistory {
        count: u32,
        reply: oneshot::Sender<String>,
    },
}

/// The tracked call as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub state: String,
    pub line_id: String,
    /// JSON of the matching contact, `{}` when unknown.
    pub contact: String,
}

/// Outcome carried by `RemoteDeviceSelected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Selected address; empty when the session went away.
    Value(String),
    Error(String),
}

impl Selection {
    pub fn to_json(&self) -> String {
        match self {
            Selection::Value(value) => json!({ "value": value }).to_string(),
            Selection::Error(error) => json!({ "error": error }).to_string(),
        }
    }
}

/// Externally visible notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    RemoteDeviceSelected(Selection),
    ContactsChanged,
    CallHistoryChanged,
    CallHistoryEntryAdded(String),
    CallChanged(CallSnapshot),
}

/// Receiver of outward notifications.
pub trait NotificationSink: Send + 'static {
    fn notify(&self, notification: Notification);
}

impl NotificationSink for mpsc::UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        if self.send(notification).is_err() {
            tracing::debug!("Notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_ops_ids_are_unique() {
        let mut ops = PendingOps::new();
        let a = ops.insert("a");
        let b = ops.insert("b");
        assert_ne!(a, b);
        assert_eq!(ops.len(), 2);

        assert_eq!(ops.take(a), Some("a"));
        assert_eq!(ops.take(a), None);
        let c = ops.insert("c");
        assert_ne!(c, a);
        assert_eq!(ops.take(b), Some("b"));
        assert_eq!(ops.take(c), Some("c"));
        assert!(ops.is_empty());
    }

    #[test]
    fn test_selection_json() {
        assert_eq!(
            Selection::Value("AA:BB:CC:DD:EE:FF".into()).to_json(),
            r#"{"value":"AA:BB:CC:DD:EE:FF"}"#
        );
        assert_eq!(Selection::Value(String::new()).to_json(), r#"{"value":""}"#);
        assert_eq!(
            Selection::Error("Invalid MAC address".into()).to_json(),
            r#"{"error":"Invalid MAC address"}"#
        );
    }
}
