//! The exported `org.tizen.Phone` object.
//!
//! Method calls are forwarded to the orchestrator as [`Command`]s and
//! answered from its reply. Notifications coming back out are emitted as
//! signals on the same object by [`forward_notifications`].

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use zbus::object_server::SignalEmitter;
use zbus::zvariant::Value;
use zbus::{connection, interface, Connection};

use crate::config::ServiceConfig;
use crate::error::{PhoneError, Result};
use crate::events::{CallSnapshot, Command, Event, EventSender, Notification};

pub struct PhoneService {
    events: EventSender,
}

impl PhoneService {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Submits a command and waits for the orchestrator's answer.
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, answer) = oneshot::channel();
        self.events
            .send(Event::Command(command(reply)))
            .map_err(|_| PhoneError::Unavailable)?;
        answer.await.map_err(|_| PhoneError::Unavailable)
    }
}

/// `a{sv}` form of a call snapshot, shared by `ActiveCall` and `CallChanged`.
pub fn call_properties(call: &CallSnapshot) -> HashMap<String, Value<'static>> {
    HashMap::from([
        ("state".to_string(), Value::from(call.state.clone())),
        ("line_id".to_string(), Value::from(call.line_id.clone())),
        ("contact".to_string(), Value::from(call.contact.clone())),
    ])
}

#[interface(name = "org.tizen.Phone")]
impl PhoneService {
    async fn select_remote_device(&self, address: String) -> zbus::fdo::Result<()> {
        tracing::debug!("SelectRemoteDevice({})", address);
        self.request(|reply| Command::SelectRemoteDevice { address, reply })
            .await??;
        Ok(())
    }

    async fn get_selected_remote_device(&self) -> zbus::fdo::Result<String> {
        Ok(self
            .request(|reply| Command::GetSelectedRemoteDevice { reply })
            .await?)
    }

    async fn unselect_remote_device(&self) -> zbus::fdo::Result<()> {
        tracing::debug!("UnselectRemoteDevice()");
        Ok(self
            .request(|reply| Command::UnselectRemoteDevice { reply })
            .await?)
    }

    async fn dial(&self, number: String) -> zbus::fdo::Result<()> {
        tracing::debug!("Dial({})", number);
        self.request(|reply| Command::Dial { number, reply }).await??;
        Ok(())
    }

    async fn answer(&self) -> zbus::fdo::Result<()> {
        self.request(|reply| Command::Answer { reply }).await??;
        Ok(())
    }

    async fn hangup(&self) -> zbus::fdo::Result<()> {
        self.request(|reply| Command::Hangup { reply }).await??;
        Ok(())
    }

    async fn mute(&self, muted: bool) -> zbus::fdo::Result<()> {
        self.request(|reply| Command::Mute { muted, reply }).await??;
        Ok(())
    }

    async fn active_call(&self) -> zbus::fdo::Result<HashMap<String, Value<'static>>> {
        let call = self.request(|reply| Command::ActiveCall { reply }).await?;
        Ok(call_properties(&call))
    }

    async fn synchronize(&self) -> zbus::fdo::Result<()> {
        tracing::debug!("Synchronize()");
        self.request(|reply| Command::Synchronize { reply }).await??;
        Ok(())
    }

    /// JSON array of the first `count` contacts, all of them for 0.
    async fn get_contacts(&self, count: u32) -> zbus::fdo::Result<String> {
        Ok(self
            .request(|reply| Command::GetContacts { count, reply })
            .await?)
    }

    /// JSON array of the first `count` call history entries, newest first.
    async fn get_call_history(&self, count: u32) -> zbus::fdo::Result<String> {
        Ok(self
            .request(|reply| Command::GetCallHistory { count, reply })
            .await?)
    }

    /// `{"value": address}` on success, `{"error": message}` otherwise.
    #[zbus(signal)]
    async fn remote_device_selected(emitter: &SignalEmitter<'_>, result: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn contacts_changed(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn call_history_changed(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn call_history_entry_added(emitter: &SignalEmitter<'_>, entry: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn call_changed(
        emitter: &SignalEmitter<'_>,
        call: HashMap<String, Value<'static>>,
    ) -> zbus::Result<()>;
}

/// Connects to the session bus, serves the object and claims the bus name.
pub async fn serve(config: &ServiceConfig, events: EventSender) -> zbus::Result<Connection> {
    tracing::info!("Starting D-Bus service {}", config.bus_name);

    let connection = connection::Builder::session()?.build().await?;

    // Serve the object before owning the name so no call can miss it.
    connection
        .object_server()
        .at(config.object_path.as_str(), PhoneService::new(events))
        .await?;
    connection.request_name(config.bus_name.as_str()).await?;

    tracing::info!("D-Bus service started at {}", config.object_path);
    Ok(connection)
}

/// Emits every notification as a signal until the sender side closes.
pub async fn forward_notifications(
    connection: Connection,
    object_path: String,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
) {
    let emitter = match SignalEmitter::new(&connection, object_path.as_str()) {
        Ok(emitter) => emitter,
        Err(e) => {
            tracing::error!("Cannot emit signals on {}: {}", object_path, e);
            return;
        }
    };

    while let Some(notification) = notifications.recv().await {
        if let Err(e) = emit(&emitter, &notification).await {
            tracing::warn!("Failed to emit {:?}: {}", notification, e);
        }
    }
    tracing::debug!("Notification channel closed");
}

async fn emit(emitter: &SignalEmitter<'_>, notification: &Notification) -> zbus::Result<()> {
    match notification {
        Notification::RemoteDeviceSelected(selection) => {
            PhoneService::remote_device_selected(emitter, &selection.to_json()).await
        }
        Notification::ContactsChanged => PhoneService::contacts_changed(emitter).await,
        Notification::CallHistoryChanged => PhoneService::call_history_changed(emitter).await,
        Notification::CallHistoryEntryAdded(entry) => {
            PhoneService::call_history_entry_added(emitter, entry).await
        }
        Notification::CallChanged(call) => {
            PhoneService::call_changed(emitter, call_properties(call)).await
        }
    }
}
