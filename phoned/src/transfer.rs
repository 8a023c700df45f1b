//! obexd phonebook session, the serialized pull queue and its stall watchdog.
//!
//! Only one pull is ever outstanding. The head of the [`SyncQueue`] is the
//! request in flight; it is popped when its transfer completes, errors,
//! fails to start or is abandoned. A one-shot timer armed per transfer
//! reports [`TimerEvent::StallCheck`]; it only has an effect if that same
//! transfer is still the active one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use phoned_dbus::names::{freedesktop, obex, signals};
use phoned_dbus::{
    MacAddress, PullFilter, SignalBody, SignalMessage, SubscriptionKey, SubscriptionRegistry,
    TransferBus,
};

use crate::error::{PhoneError, Result};
use crate::events::{Event, EventSender, OpId, PendingOps, TimerEvent, TransferEvent};
use crate::records::{RecordKind, RecordStore};
use crate::sync::{PhonebookFolder, SyncQueue, SyncRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveTransfer {
    path: String,
    filename: String,
    folder: PhonebookFolder,
    /// Device selected when the pull started.
    origin: Option<MacAddress>,
}

fn transfer_key(path: &str) -> SubscriptionKey {
    SubscriptionKey::session(
        obex::SERVICE,
        freedesktop::PROPERTIES_IFACE,
        path,
        signals::PROPERTIES_CHANGED,
    )
}

pub struct TransferTracker<B> {
    bus: Arc<B>,
    events: EventSender,
    stall_timeout: Duration,
    vcard_format: String,
    session: Option<String>,
    /// Requested devices of in-flight CreateSession calls.
    pending: PendingOps<MacAddress>,
    /// Only the newest CreateSession completion is honoured.
    latest_create: Option<OpId>,
    queue: SyncQueue,
    active: Option<ActiveTransfer>,
    records: RecordStore,
    /// Device the cached records were pulled from.
    records_owner: Option<MacAddress>,
    selected: Option<MacAddress>,
}

impl<B: TransferBus + 'static> TransferTracker<B> {
    pub fn new(
        bus: Arc<B>,
        events: EventSender,
        stall_timeout: Duration,
        vcard_format: &str,
        records: RecordStore,
    ) -> Self {
        Self {
            bus,
            events,
            stall_timeout,
            vcard_format: vcard_format.to_string(),
            session: None,
            pending: PendingOps::new(),
            latest_create: None,
            queue: SyncQueue::new(),
            active: None,
            records,
            records_owner: None,
            selected: None,
        }
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_transfer(&self) -> Option<&str> {
        self.active.as_ref().map(|t| t.path.as_str())
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    #[cfg(test)]
    pub(crate) fn records_mut(&mut self) -> &mut RecordStore {
        &mut self.records
    }

    pub fn selected(&self) -> Option<MacAddress> {
        self.selected
    }

    /// Device whose pulls are accepted into the record store.
    pub fn set_selected(&mut self, selected: Option<MacAddress>) {
        self.selected = selected;
    }

    fn emit(&self, event: TransferEvent) {
        if self.events.send(Event::Transfer(event)).is_err() {
            tracing::debug!("Event channel closed");
        }
    }

    /// Replaces any current session with a new one to `device`.
    pub fn create_session(&mut self, registry: &mut SubscriptionRegistry, device: MacAddress) {
        self.close_session(registry);

        if self.records_owner.is_some_and(|owner| owner != device) {
            tracing::debug!("Releasing records of previous device");
            self.records.clear();
        }
        self.records_owner = Some(device);

        tracing::info!("Creating phonebook session to {}", device);
        let id = self.pending.insert(device);
        self.latest_create = Some(id);

        let bus = self.bus.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = bus.create_session(&device.to_string()).await;
            if events.send(Event::TransferReply(id, result)).is_err() {
                tracing::debug!("Event channel closed before session reply {}", id);
            }
        });
    }

    pub fn handle_reply(&mut self, id: OpId, result: phoned_dbus::BusResult<String>) {
        let Some(device) = self.pending.take(id) else {
            tracing::debug!("Reply for unknown session request {}", id);
            return;
        };

        if self.latest_create != Some(id) {
            if let Ok(session) = result {
                tracing::debug!("Releasing outdated session {} to {}", session, device);
                self.release_remote(session);
            }
            return;
        }
        self.latest_create = None;

        match result {
            Ok(session) if !session.is_empty() => {
                tracing::info!("Created session {} to {}", session, device);
                self.session = Some(session.clone());
                self.emit(TransferEvent::SessionCreated(session));
            }
            Ok(_) => {
                tracing::error!("CreateSession returned no session");
                self.emit(TransferEvent::SessionFailed(
                    "Invalid reply from 'CreateSession'".to_string(),
                ));
            }
            Err(e) => {
                tracing::error!("Failed to create session to {}: {}", device, e);
                self.emit(TransferEvent::SessionFailed(e.message().to_string()));
            }
        }
    }

    fn release_remote(&self, session: String) {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.remove_session(&session).await {
                tracing::error!("Failed to remove session {}: {}", session, e);
            }
        });
    }

    /// Drops the session and every queued request. Cached records stay.
    pub fn close_session(&mut self, registry: &mut SubscriptionRegistry) {
        self.latest_create = None;
        self.queue.clear();
        self.abandon_transfer(registry);

        if let Some(session) = self.session.take() {
            tracing::info!("Removing session {}", session);
            self.release_remote(session);
        }
    }

    /// Drops the session and releases cached records.
    pub fn remove_session(&mut self, registry: &mut SubscriptionRegistry, notify: bool) {
        let idle = self.session.is_none() && self.latest_create.is_none();
        if idle && self.records.is_empty() {
            return;
        }

        self.close_session(registry);
        self.records.clear();
        self.records_owner = None;
        if notify {
            self.emit(TransferEvent::SessionRemoved);
        }
    }

    fn abandon_transfer(&mut self, registry: &mut SubscriptionRegistry) {
        if let Some(transfer) = self.active.take() {
            tracing::debug!("Abandoning transfer {}", transfer.path);
            registry.unsubscribe(&transfer_key(&transfer.path));
        }
    }

    /// Chooses the phonebook view. Blocks the loop until obexd answers.
    pub async fn select(&self, request: &SyncRequest) -> bool {
        let Some(session) = &self.session else {
            tracing::error!("No session to select {} on", request);
            return false;
        };
        match self
            .bus
            .select_phonebook(session, request.location.as_str(), request.folder.as_str())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to select phonebook {}: {}", request, e);
                false
            }
        }
    }

    /// Starts the bulk pull for `request`. Returns whether a transfer began;
    /// the caller advances the queue otherwise.
    pub async fn pull_all(
        &mut self,
        registry: &mut SubscriptionRegistry,
        request: &SyncRequest,
    ) -> bool {
        let Some(session) = self.session.clone() else {
            tracing::error!("No session to pull {} on", request);
            return false;
        };

        let mut filters = HashMap::new();
        filters.insert("Format".to_string(), PullFilter::Str(self.vcard_format.clone()));
        if request.max_count > 0 {
            filters.insert("MaxCount".to_string(), PullFilter::U16(request.max_count));
        }

        let started = match self.bus.pull_all(&session, filters).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!("Failed to PullAll {}: {}", request, e);
                return false;
            }
        };
        tracing::debug!("Pulling {} into {}", request, started.filename);

        registry.subscribe(transfer_key(&started.path)).await;
        self.arm_stall_check(started.path.clone());
        self.active = Some(ActiveTransfer {
            path: started.path,
            filename: started.filename,
            folder: request.folder,
            origin: self.selected,
        });
        true
    }

    fn arm_stall_check(&self, transfer: String) {
        let events = self.events.clone();
        let timeout = self.stall_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Receiver gone means the daemon is shutting down.
            let _ = events.send(Event::Timer(TimerEvent::StallCheck(transfer)));
        });
    }

    async fn start_head(&mut self, registry: &mut SubscriptionRegistry) -> bool {
        let Some(request) = self.queue.head().cloned() else {
            return false;
        };
        tracing::debug!("Synchronizing {}", request);
        self.select(&request).await && self.pull_all(registry, &request).await
    }

    pub async fn enqueue(&mut self, registry: &mut SubscriptionRegistry, request: SyncRequest) {
        if self.queue.push(request) && !self.start_head(registry).await {
            self.advance(registry).await;
        }
    }

    /// Retires the head and starts the next request that can start.
    pub async fn advance(&mut self, registry: &mut SubscriptionRegistry) {
        self.abandon_transfer(registry);
        if self.queue.pop().is_none() {
            return;
        }
        while !self.queue.is_empty() {
            if self.start_head(registry).await {
                return;
            }
            self.queue.pop();
        }
        tracing::info!("Phonebook synchronization done");
        self.emit(TransferEvent::SynchronizationDone);
    }

    pub async fn sync_contacts(&mut self, registry: &mut SubscriptionRegistry) -> Result<()> {
        if self.session.is_none() {
            return Err(PhoneError::NoSession);
        }
        self.enqueue(registry, SyncRequest::contacts()).await;
        Ok(())
    }

    pub async fn sync_call_history(
        &mut self,
        registry: &mut SubscriptionRegistry,
        max_count: u16,
    ) -> Result<()> {
        if self.session.is_none() {
            return Err(PhoneError::NoSession);
        }
        self.enqueue(registry, SyncRequest::call_history(max_count))
            .await;
        Ok(())
    }

    /// Stall timer expiry for `transfer`.
    pub fn check_stalled(&mut self, registry: &mut SubscriptionRegistry, transfer: &str) {
        if !self.active.as_ref().is_some_and(|t| t.path == transfer) {
            return;
        }
        tracing::warn!("Transfer {} stalled", transfer);
        self.abandon_transfer(registry);
        self.queue.clear();
        self.emit(TransferEvent::Stalled);
    }

    pub async fn handle_signal(&mut self, registry: &mut SubscriptionRegistry, msg: &SignalMessage) {
        let SignalBody::PropertiesChanged { interface, changed } = &msg.body else {
            return;
        };
        if interface != obex::TRANSFER_IFACE {
            return;
        }
        let Some(status) = changed.get("Status").and_then(|v| v.as_str()) else {
            return;
        };

        let is_active = self.active.as_ref().is_some_and(|t| t.path == msg.path());
        if !is_active {
            if matches!(status, "complete" | "error") {
                registry.unsubscribe(&msg.key);
            }
            return;
        }

        match status {
            "complete" => {
                if let Some(transfer) = self.active.take() {
                    registry.unsubscribe(&msg.key);
                    self.process_transfer(&transfer);
                }
                self.advance(registry).await;
            }
            "error" => {
                tracing::error!("Transfer {} failed", msg.path());
                self.advance(registry).await;
            }
            other => tracing::debug!("Transfer {} is {}", msg.path(), other),
        }
    }

    fn process_transfer(&mut self, transfer: &ActiveTransfer) {
        if transfer.origin.is_none() || transfer.origin != self.selected {
            tracing::debug!("Pulled records don't belong to the selected device, ignoring");
            return;
        }

        // Phones emit stray bytes in card text; decode what can be decoded.
        let payload = match std::fs::read(&transfer.filename) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::error!("Failed to read {}: {}", transfer.filename, e);
                return;
            }
        };

        if transfer.folder.is_call_history() {
            let added = self.records.ingest(RecordKind::CallHistory, &payload);
            for uid in added {
                if let Some(entry) = self.records.call_history_entry_json(&uid) {
                    self.emit(TransferEvent::CallHistoryEntryAdded(entry));
                }
            }
            self.emit(TransferEvent::CallHistoryChanged);
        } else {
            self.records.ingest(RecordKind::Contacts, &payload);
            self.emit(TransferEvent::ContactsChanged);
        }
    }
}
