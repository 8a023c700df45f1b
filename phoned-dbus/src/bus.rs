//! Trait abstractions over the four peer services.
//!
//! The daemon core only talks to these traits. [`crate::DbusTransport`]
//! implements them on real zbus connections; tests substitute an in-memory
//! bus. Every method is asynchronous so callers can either await it
//! inline or spawn it and feed the completion back as an event.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::signal::{PropMap, SignalMessage, SubscriptionKey};

/// Errors returned by remote calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The peer answered with a D-Bus error reply.
    #[error("{name}: {message}")]
    Method { name: String, message: String },
    /// Connection or marshaling failure.
    #[error("D-Bus transport error: {0}")]
    Transport(String),
    /// The reply did not carry what the call promised.
    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}

impl BusError {
    /// Human readable message, without the error name.
    pub fn message(&self) -> &str {
        match self {
            BusError::Method { message, .. } => message,
            BusError::Transport(message) | BusError::InvalidReply(message) => message,
        }
    }
}

impl From<zbus::Error> for BusError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, message, _) => BusError::Method {
                name: name.to_string(),
                message: message.unwrap_or_default(),
            },
            zbus::Error::FDO(fdo) => BusError::from(*fdo),
            other => BusError::Transport(other.to_string()),
        }
    }
}

impl From<zbus::fdo::Error> for BusError {
    fn from(err: zbus::fdo::Error) -> Self {
        use zbus::DBusError;

        match err {
            zbus::fdo::Error::ZBus(inner) => BusError::from(inner),
            other => {
                let name = other.name().to_string();
                let message = other.description().unwrap_or_default().to_string();
                BusError::Method { name, message }
            }
        }
    }
}

pub type BusResult<T> = std::result::Result<T, BusError>;

/// Where subscribed signals are delivered.
pub type SignalSink = mpsc::UnboundedSender<SignalMessage>;

/// Live signal subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct SignalHandle {
    task: Option<JoinHandle<()>>,
}

impl SignalHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A handle with no backing task, for buses that deliver signals
    /// without a per-subscription listener.
    pub fn detached() -> Self {
        Self { task: None }
    }
}

impl Drop for SignalHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// An object path with its properties, as returned by `GetModems`,
/// `GetCalls`, `GetTechnologies` and `GetManagedObjects`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub path: String,
    pub properties: PropMap,
}

impl ObjectInfo {
    pub fn new(path: impl Into<String>, properties: PropMap) -> Self {
        Self {
            path: path.into(),
            properties,
        }
    }

    pub fn bool_property(&self, name: &str) -> Option<bool> {
        self.properties.get(name).and_then(|v| v.as_bool())
    }

    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }
}

/// A bulk pull accepted by obexd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStarted {
    /// Transfer object path; the correlation id of the pull.
    pub path: String,
    /// Local file the payload is written to.
    pub filename: String,
}

/// Signal match registration.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Starts forwarding signals matching `key` into `sink`.
    async fn subscribe(&self, key: &SubscriptionKey, sink: SignalSink) -> BusResult<SignalHandle>;
}

/// BlueZ adapter and device queries.
#[async_trait]
pub trait AdapterBus: Send + Sync {
    /// First object exposing `org.bluez.Adapter1`, with its adapter properties.
    async fn default_adapter(&self) -> BusResult<Option<ObjectInfo>>;

    /// Known device objects with their `org.bluez.Device1` properties.
    async fn devices(&self) -> BusResult<Vec<ObjectInfo>>;

    async fn set_adapter_powered(&self, adapter: &str, powered: bool) -> BusResult<()>;
}

/// ConnMan technology control.
#[async_trait]
pub trait TechnologyBus: Send + Sync {
    async fn technologies(&self) -> BusResult<Vec<ObjectInfo>>;

    async fn set_technology_powered(&self, technology: &str, powered: bool) -> BusResult<()>;
}

/// oFono modem and voice-call control.
#[async_trait]
pub trait ModemBus: Send + Sync {
    async fn modems(&self) -> BusResult<Vec<ObjectInfo>>;

    async fn modem_properties(&self, modem: &str) -> BusResult<PropMap>;

    async fn set_modem_powered(&self, modem: &str, powered: bool) -> BusResult<()>;

    async fn calls(&self, modem: &str) -> BusResult<Vec<ObjectInfo>>;

    /// Returns the new call's object path.
    async fn dial(&self, modem: &str, number: &str) -> BusResult<String>;

    async fn answer(&self, call: &str) -> BusResult<()>;

    async fn hangup(&self, call: &str) -> BusResult<()>;

    async fn set_muted(&self, modem: &str, muted: bool) -> BusResult<()>;
}

/// obexd phonebook transfers.
#[async_trait]
pub trait TransferBus: Send + Sync {
    /// Returns the session object path.
    async fn create_session(&self, destination: &str) -> BusResult<String>;

    async fn remove_session(&self, session: &str) -> BusResult<()>;

    async fn select_phonebook(&self, session: &str, location: &str, folder: &str)
        -> BusResult<()>;

    async fn pull_all(
        &self,
        session: &str,
        filters: HashMap<String, PullFilter>,
    ) -> BusResult<TransferStarted>;
}

/// PullAll filter values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullFilter {
    Str(String),
    U16(u16),
}

/// Everything the daemon needs from the buses.
pub trait PhoneBus:
    SignalBus + AdapterBus + TechnologyBus + ModemBus + TransferBus + 'static
{
}

impl<T> PhoneBus for T where
    T: SignalBus + AdapterBus + TechnologyBus + ModemBus + TransferBus + 'static
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_error_keeps_message() {
        let err = BusError::Method {
            name: "net.connman.Error.AlreadyEnabled".into(),
            message: "Already enabled".into(),
        };
        assert_eq!(err.message(), "Already enabled");
        assert_eq!(
            err.to_string(),
            "net.connman.Error.AlreadyEnabled: Already enabled"
        );
    }

    #[tokio::test]
    async fn test_signal_handle_aborts_task_on_drop() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await
        });
        drop(SignalHandle::new(task));
        assert!(rx.await.is_err());
    }
}
