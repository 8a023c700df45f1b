//! Device-session state machine.
//!
//! Owns the wanted and selected device and drives the four trackers from
//! one inbox. Everything runs on a single task: signals, remote call
//! completions, timers and public method calls are handled one at a time.
//!
//! The session lifecycle is:
//! wanted device set, modem looked up and powered, phonebook session
//! created, contacts and call history pulled, session closed again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use phoned_dbus::names::{bluez, connman, obex, ofono};
use phoned_dbus::{MacAddress, PhoneBus, SignalMessage, SubscriptionRegistry};
use tokio::sync::{mpsc, oneshot};

use crate::adapter::AdapterTracker;
use crate::config::Config;
use crate::constants::notifications;
use crate::error::{PhoneError, Result};
use crate::events::{
    AdapterEvent, CallSnapshot, Command, Event, EventReceiver, EventSender, ModemEvent,
    Notification, NotificationSink, Selection, TimerEvent, TransferEvent,
};
use crate::modem::{CallFuture, ModemTracker};
use crate::records::RecordStore;
use crate::selection::SelectionStore;
use crate::technology::TechnologyTracker;
use crate::transfer::TransferTracker;

/// Receiving ends of the orchestrator's inbox.
pub struct Inbox {
    pub events: EventReceiver,
    pub signals: mpsc::UnboundedReceiver<SignalMessage>,
}

pub struct Orchestrator<B, N> {
    events: EventSender,
    registry: SubscriptionRegistry,
    adapter: AdapterTracker<B>,
    technology: TechnologyTracker<B>,
    modem: ModemTracker<B>,
    transfer: TransferTracker<B>,
    selection: SelectionStore,
    notifier: N,
    modem_watchdog: Duration,
    refresh_delay: Duration,
    refresh_count: u16,
    power_on_start: bool,
    wanted: Option<MacAddress>,
    selected: Option<MacAddress>,
    /// Set once the phonebook has been fully pulled for the current session.
    synchronized: bool,
}

impl<B: PhoneBus, N: NotificationSink> Orchestrator<B, N> {
    pub fn new(
        bus: Arc<B>,
        config: &Config,
        selection: SelectionStore,
        records: RecordStore,
        notifier: N,
    ) -> (Self, Inbox) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            registry: SubscriptionRegistry::new(bus.clone(), signals),
            adapter: AdapterTracker::new(bus.clone(), events.clone()),
            technology: TechnologyTracker::new(bus.clone()),
            modem: ModemTracker::new(bus.clone(), events.clone()),
            transfer: TransferTracker::new(
                bus,
                events.clone(),
                config.timeouts.stalled_transfer(),
                &config.sync.vcard_format,
                records,
            ),
            events,
            selection,
            notifier,
            modem_watchdog: config.timeouts.modem_watchdog(),
            refresh_delay: config.timeouts.call_history_refresh_delay(),
            refresh_count: config.sync.call_history_refresh_count,
            power_on_start: config.bluetooth.power_on_start,
            wanted: None,
            selected: None,
            synchronized: false,
        };
        let inbox = Inbox {
            events: events_rx,
            signals: signals_rx,
        };
        (orchestrator, inbox)
    }

    /// Sender for submitting [`Command`]s from the service surface.
    pub fn sender(&self) -> EventSender {
        self.events.clone()
    }

    pub fn wanted(&self) -> Option<MacAddress> {
        self.wanted
    }

    pub fn selected(&self) -> Option<MacAddress> {
        self.selected
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Subscribes to the peer managers, restores the persisted selection
    /// and starts the modem watchdog.
    pub async fn start(&mut self) {
        self.adapter.start(&mut self.registry).await;
        self.technology.start(&mut self.registry).await;
        self.modem.start(&mut self.registry).await;

        if self.power_on_start {
            if self.technology.set_powered(true).await {
                self.adapter.set_powered(true).await;
            } else {
                tracing::warn!("Could not power on the Bluetooth technology");
            }
        }

        self.spawn_modem_watchdog();

        self.wanted = self.selection.load();
        if let Some(wanted) = self.wanted {
            tracing::info!("Restored selected remote device {}", wanted);
            if self.adapter.is_paired(&wanted) {
                tracing::debug!("{} is paired, starting services", wanted);
                self.start_services();
            }
        }
    }

    fn spawn_modem_watchdog(&self) {
        let events = self.events.clone();
        let period = self.modem_watchdog;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if events.send(Event::Timer(TimerEvent::ModemWatchdog)).is_err() {
                    break;
                }
            }
        });
    }

    /// Runs until `shutdown` resolves, then releases the session and every
    /// subscription.
    pub async fn run<F>(mut self, mut inbox: Inbox, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutting down");
                    break;
                }
                Some(event) = inbox.events.recv() => self.handle_event(event).await,
                Some(msg) = inbox.signals.recv() => self.handle_signal(msg).await,
                else => break,
            }
        }
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        self.transfer.remove_session(&mut self.registry, false);
        self.registry.clear();
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    pub async fn handle_signal(&mut self, msg: SignalMessage) {
        tracing::trace!("Signal {}", msg.key);
        match msg.key.service.as_str() {
            bluez::SERVICE => self.adapter.handle_signal(&mut self.registry, &msg).await,
            connman::SERVICE => self.technology.handle_signal(&msg),
            ofono::SERVICE => self.modem.handle_signal(&mut self.registry, &msg).await,
            obex::SERVICE => self.transfer.handle_signal(&mut self.registry, &msg).await,
            other => tracing::debug!("Signal from unexpected service {}", other),
        }
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Adapter(event) => self.on_adapter(event),
            Event::Modem(event) => self.on_modem(event),
            Event::Transfer(event) => self.on_transfer(event).await,
            Event::ModemReply(id, reply) => {
                self.modem.handle_reply(&mut self.registry, id, reply).await
            }
            Event::TransferReply(id, result) => self.transfer.handle_reply(id, result),
            Event::Timer(timer) => self.on_timer(timer).await,
            Event::Command(command) => self.on_command(command).await,
        }
    }

    fn set_selected(&mut self, selected: Option<MacAddress>) {
        self.selected = selected;
        self.transfer.set_selected(selected);
    }

    /// Looks up the wanted device's modem. The session follows once the
    /// modem reports powered.
    fn start_services(&mut self) {
        self.set_selected(None);
        match self.wanted {
            Some(wanted) => self.modem.select_modem(wanted),
            None => tracing::debug!("No wanted device, nothing to start"),
        }
    }

    /// Releases the modem. Its power-off notification tears the session down.
    fn stop_services(&mut self) {
        self.set_selected(None);
        self.modem.remove_modem(&mut self.registry);
    }

    fn create_session(&mut self) {
        match self.wanted {
            Some(wanted) => self.transfer.create_session(&mut self.registry, wanted),
            None => tracing::debug!("No wanted device to create a session to"),
        }
    }

    fn on_adapter(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Added(path) => {
                tracing::info!("Default adapter added: {}", path);
                if self.wanted.is_some() {
                    self.start_services();
                }
            }
            AdapterEvent::Removed(path) => {
                tracing::info!("Default adapter removed: {}", path);
                self.stop_services();
            }
            AdapterEvent::Powered(true) => {
                let paired = self.wanted.is_some_and(|w| self.adapter.is_paired(&w));
                if paired {
                    self.start_services();
                }
            }
            AdapterEvent::Powered(false) => self.stop_services(),
            AdapterEvent::DeviceCreated(path) => {
                let device = MacAddress::from_device_path(&path).ok();
                if device.is_some() && device == self.wanted {
                    tracing::info!("Wanted device paired: {}", path);
                    self.start_services();
                }
            }
            AdapterEvent::DeviceRemoved(path) => {
                let device = MacAddress::from_device_path(&path).ok();
                if device.is_some() && device == self.selected {
                    tracing::info!("Selected device removed: {}", path);
                    self.stop_services();
                }
            }
        }
    }

    fn on_modem(&mut self, event: ModemEvent) {
        match event {
            ModemEvent::Added(address) => match self.wanted {
                None => {
                    tracing::info!("No device selected yet, defaulting to {}", address);
                    self.wanted = Some(address);
                    self.persist(&address);
                    self.start_services();
                }
                Some(wanted) if wanted == address => self.modem.select_modem(wanted),
                Some(_) => {}
            },
            ModemEvent::Powered(powered) => {
                self.synchronized = false;
                if powered {
                    self.create_session();
                } else {
                    self.transfer.remove_session(&mut self.registry, true);
                }
            }
            ModemEvent::SetPoweredFailed(message) => {
                tracing::warn!("Modem power on failed: {}", message);
                self.notify(Notification::RemoteDeviceSelected(Selection::Error(message)));
            }
            ModemEvent::CallChanged { state, line_id } => self.on_call_changed(state, line_id),
        }
    }

    fn on_call_changed(&mut self, state: String, line_id: String) {
        tracing::info!("Call changed: {} {}", state, line_id);
        if state == notifications::NO_CALL_STATE {
            // The phone may not have logged the call yet.
            let events = self.events.clone();
            let delay = self.refresh_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(Event::Timer(TimerEvent::CallHistoryRefresh));
            });
        }
        let contact = self.transfer.records().contact_by_number(&line_id);
        self.notify(Notification::CallChanged(CallSnapshot {
            state,
            line_id,
            contact,
        }));
    }

    async fn on_transfer(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::SessionCreated(session) => {
                self.set_selected(self.wanted);
                let selected = self.selected.map(|s| s.to_string()).unwrap_or_default();
                tracing::info!("Session {} ready, selected {}", session, selected);
                self.notify(Notification::RemoteDeviceSelected(Selection::Value(selected)));

                if let Err(e) = self.transfer.sync_contacts(&mut self.registry).await {
                    tracing::error!("Failed to queue contacts sync: {}", e);
                }
                if let Err(e) = self.transfer.sync_call_history(&mut self.registry, 0).await {
                    tracing::error!("Failed to queue call history sync: {}", e);
                }
            }
            TransferEvent::SessionFailed(message) => {
                tracing::warn!("Session failed: {}", message);
                self.notify(Notification::RemoteDeviceSelected(Selection::Error(message)));
            }
            TransferEvent::SessionRemoved => {
                self.notify(Notification::RemoteDeviceSelected(Selection::Value(String::new())));
                self.notify(Notification::ContactsChanged);
                self.notify(Notification::CallHistoryChanged);
            }
            TransferEvent::Stalled => {
                if self.adapter.is_powered() && self.wanted.is_some() {
                    tracing::info!("Retrying stalled synchronization");
                    self.synchronized = false;
                    self.set_selected(None);
                    self.create_session();
                } else {
                    tracing::info!("Adapter not powered or no wanted device, not retrying");
                }
            }
            TransferEvent::SynchronizationDone => {
                self.synchronized = true;
                // Sessions are held only while pulling.
                self.transfer.close_session(&mut self.registry);
            }
            TransferEvent::ContactsChanged => {
                if !self.synchronized {
                    self.notify(Notification::ContactsChanged);
                }
            }
            TransferEvent::CallHistoryChanged => {
                if !self.synchronized {
                    self.notify(Notification::CallHistoryChanged);
                }
            }
            TransferEvent::CallHistoryEntryAdded(entry) => {
                // The initial pull would otherwise raise one signal per entry.
                if self.synchronized {
                    self.notify(Notification::CallHistoryEntryAdded(entry));
                }
            }
        }
    }

    async fn on_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::StallCheck(transfer) => {
                self.transfer.check_stalled(&mut self.registry, &transfer)
            }
            TimerEvent::ModemWatchdog => self.modem.watchdog_tick(),
            TimerEvent::CallHistoryRefresh => {
                let count = self.refresh_count;
                match self.transfer.sync_call_history(&mut self.registry, count).await {
                    Ok(()) => {}
                    Err(PhoneError::NoSession) => self.create_session(),
                    Err(e) => tracing::error!("Call history refresh failed: {}", e),
                }
            }
        }
    }

    fn persist(&self, address: &MacAddress) {
        if let Err(e) = self.selection.store(address) {
            tracing::warn!("Failed to persist selected device: {}", e);
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::SelectRemoteDevice { address, reply } => {
                let _ = reply.send(self.select_remote_device(&address));
            }
            Command::GetSelectedRemoteDevice { reply } => {
                let selected = self.selected.map(|s| s.to_string()).unwrap_or_default();
                let _ = reply.send(selected);
            }
            Command::UnselectRemoteDevice { reply } => {
                tracing::info!("Unselecting remote device");
                self.wanted = None;
                self.stop_services();
                let _ = reply.send(());
            }
            Command::Dial { number, reply } => answer_later(self.modem.dial(&number), reply),
            Command::Answer { reply } => answer_later(self.modem.answer(), reply),
            Command::Hangup { reply } => answer_later(self.modem.hangup(), reply),
            Command::Mute { muted, reply } => answer_later(self.modem.mute(muted), reply),
            Command::ActiveCall { reply } => {
                let _ = reply.send(self.active_call());
            }
            Command::Synchronize { reply } => {
                let result = match self.wanted {
                    Some(_) => {
                        self.create_session();
                        Ok(())
                    }
                    None => Err(PhoneError::NoRemoteDevice),
                };
                let _ = reply.send(result);
            }
            Command::GetContacts { count, reply } => {
                let _ = reply.send(self.transfer.records().contacts_json(count));
            }
            Command::GetCallHistory { count, reply } => {
                let _ = reply.send(self.transfer.records().call_history_json(count));
            }
        }
    }

    fn select_remote_device(&mut self, address: &str) -> Result<()> {
        let device: MacAddress = match address.parse() {
            Ok(device) => device,
            Err(e) => {
                tracing::error!("Won't select remote device {:?}: invalid address", address);
                self.notify(Notification::RemoteDeviceSelected(Selection::Error(
                    notifications::INVALID_ADDRESS.to_string(),
                )));
                return Err(PhoneError::InvalidAddress(e));
            }
        };

        if self.selected == Some(device) {
            if self.synchronized {
                self.notify(Notification::RemoteDeviceSelected(Selection::Value(
                    device.to_string(),
                )));
            } else {
                // A sync may be running already; restart it anyway.
                self.wanted = Some(device);
                self.create_session();
            }
            return Ok(());
        }

        tracing::info!("Selecting remote device {}", device);
        if self.modem.is_selected() {
            self.stop_services();
        }
        self.wanted = Some(device);
        self.persist(&device);
        self.start_services();
        Ok(())
    }

    fn active_call(&self) -> CallSnapshot {
        let call = self.modem.active_call();
        let state = call
            .and_then(|c| c.state.clone())
            .unwrap_or_else(|| notifications::NO_CALL_STATE.to_string());
        let line_id = call.and_then(|c| c.line_id.clone()).unwrap_or_default();
        let contact = self.transfer.records().contact_by_number(&line_id);
        CallSnapshot {
            state,
            line_id,
            contact,
        }
    }
}

/// Replies once the call request finishes, without holding up the loop.
fn answer_later(request: Result<CallFuture>, reply: oneshot::Sender<Result<()>>) {
    match request {
        Ok(future) => {
            tokio::spawn(async move {
                let _ = reply.send(future.await);
            });
        }
        Err(e) => {
            let _ = reply.send(Err(e));
        }
    }
}

#[cfg(test)]
impl<B: PhoneBus, N: NotificationSink> Orchestrator<B, N> {
    /// Handles everything already queued, including completions of the
    /// requests that handling spawns, until the inbox stays empty.
    pub(crate) async fn settle(&mut self, inbox: &mut Inbox) {
        loop {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            let mut progressed = false;
            while let Ok(event) = inbox.events.try_recv() {
                progressed = true;
                self.handle_event(event).await;
            }
            while let Ok(msg) = inbox.signals.try_recv() {
                progressed = true;
                self.handle_signal(msg).await;
            }
            if !progressed {
                return;
            }
        }
    }
}
