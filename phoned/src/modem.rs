//! oFono hands-free modem of the wanted phone, and its voice call.
//!
//! One modem and one call are tracked at a time. Remote calls that change
//! state (enumeration, power, call listing) are spawned; their results
//! come back as [`Event::ModemReply`] and are matched to the request
//! through [`PendingOps`].

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use phoned_dbus::names::{ofono, signals};
use phoned_dbus::{
    MacAddress, ModemBus, PropMap, SignalBody, SignalMessage, SubscriptionKey,
    SubscriptionRegistry,
};

use crate::error::{PhoneError, Result};
use crate::events::{Event, EventSender, ModemEvent, ModemReply, OpId, PendingOps};

/// Completion of a voice call request, resolved off the event loop.
pub type CallFuture = BoxFuture<'static, Result<()>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemState {
    pub path: String,
    pub online: bool,
    pub powered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCall {
    pub path: String,
    pub state: Option<String>,
    pub line_id: Option<String>,
}

#[derive(Debug)]
enum PowerCheck {
    /// A power-on request failed with this message.
    AfterFailure(String),
    Watchdog,
}

#[derive(Debug)]
enum ModemOp {
    Select { wanted: MacAddress },
    SetPowered { modem: String, powered: bool },
    CheckPowered { modem: String, reason: PowerCheck },
    GetCalls { modem: String },
}

fn manager_key(signal: &str) -> SubscriptionKey {
    SubscriptionKey::system(ofono::SERVICE, ofono::MANAGER_IFACE, ofono::MANAGER_PATH, signal)
}

fn modem_keys(path: &str) -> [SubscriptionKey; 4] {
    [
        SubscriptionKey::system(
            ofono::SERVICE,
            ofono::VOICE_CALL_MANAGER_IFACE,
            path,
            signals::CALL_ADDED,
        ),
        SubscriptionKey::system(
            ofono::SERVICE,
            ofono::VOICE_CALL_MANAGER_IFACE,
            path,
            signals::PROPERTY_CHANGED,
        ),
        SubscriptionKey::system(
            ofono::SERVICE,
            ofono::VOICE_CALL_MANAGER_IFACE,
            path,
            signals::CALL_REMOVED,
        ),
        SubscriptionKey::system(ofono::SERVICE, ofono::MODEM_IFACE, path, signals::PROPERTY_CHANGED),
    ]
}

fn call_key(path: &str) -> SubscriptionKey {
    SubscriptionKey::system(
        ofono::SERVICE,
        ofono::VOICE_CALL_IFACE,
        path,
        signals::PROPERTY_CHANGED,
    )
}

pub struct ModemTracker<B> {
    bus: Arc<B>,
    events: EventSender,
    modem: Option<ModemState>,
    call: Option<ActiveCall>,
    pending: PendingOps<ModemOp>,
    /// Only the newest modem lookup is honoured.
    latest_select: Option<OpId>,
}

impl<B: ModemBus + 'static> ModemTracker<B> {
    pub fn new(bus: Arc<B>, events: EventSender) -> Self {
        Self {
            bus,
            events,
            modem: None,
            call: None,
            pending: PendingOps::new(),
            latest_select: None,
        }
    }

    /// Subscribes to modem arrival and removal.
    pub async fn start(&mut self, registry: &mut SubscriptionRegistry) {
        registry.subscribe(manager_key(signals::MODEM_ADDED)).await;
        registry.subscribe(manager_key(signals::MODEM_REMOVED)).await;
    }

    pub fn modem(&self) -> Option<&ModemState> {
        self.modem.as_ref()
    }

    pub fn is_selected(&self) -> bool {
        self.modem.is_some()
    }

    pub fn active_call(&self) -> Option<&ActiveCall> {
        self.call.as_ref()
    }

    fn is_tracked(&self, path: &str) -> bool {
        self.modem.as_ref().is_some_and(|m| m.path == path)
    }

    fn emit(&self, event: ModemEvent) {
        if self.events.send(Event::Modem(event)).is_err() {
            tracing::debug!("Event channel closed");
        }
    }

    fn spawn_op<F>(&mut self, op: ModemOp, request: F) -> OpId
    where
        F: Future<Output = ModemReply> + Send + 'static,
    {
        let id = self.pending.insert(op);
        let events = self.events.clone();
        tokio::spawn(async move {
            let reply = request.await;
            if events.send(Event::ModemReply(id, reply)).is_err() {
                tracing::debug!("Event channel closed before modem reply {}", id);
            }
        });
        id
    }

    /// Looks for the modem of `wanted` among oFono's modems.
    pub fn select_modem(&mut self, wanted: MacAddress) {
        tracing::debug!("Looking up modem for {}", wanted);
        let bus = self.bus.clone();
        let id = self.spawn_op(ModemOp::Select { wanted }, async move {
            ModemReply::Objects(bus.modems().await)
        });
        self.latest_select = Some(id);
    }

    pub fn set_modem_powered(&mut self, path: &str, powered: bool) {
        tracing::debug!("Setting modem {} Powered={}", path, powered);
        let bus = self.bus.clone();
        let modem = path.to_string();
        self.spawn_op(
            ModemOp::SetPowered {
                modem: modem.clone(),
                powered,
            },
            async move { ModemReply::Unit(bus.set_modem_powered(&modem, powered).await) },
        );
    }

    fn check_powered(&mut self, path: &str, reason: PowerCheck) {
        let bus = self.bus.clone();
        let modem = path.to_string();
        self.spawn_op(
            ModemOp::CheckPowered {
                modem: modem.clone(),
                reason,
            },
            async move { ModemReply::Properties(bus.modem_properties(&modem).await) },
        );
    }

    fn fetch_calls(&mut self, path: &str) {
        let bus = self.bus.clone();
        let modem = path.to_string();
        self.spawn_op(ModemOp::GetCalls { modem: modem.clone() }, async move {
            ModemReply::Objects(bus.calls(&modem).await)
        });
    }

    /// Periodic recovery: re-powers the tracked modem if it dropped power.
    pub fn watchdog_tick(&mut self) {
        if let Some(path) = self.modem.as_ref().map(|m| m.path.clone()) {
            self.check_powered(&path, PowerCheck::Watchdog);
        }
    }

    /// Starts tracking `path`. Rejected when a modem is already tracked.
    pub async fn add_modem(
        &mut self,
        registry: &mut SubscriptionRegistry,
        path: &str,
        properties: &PropMap,
    ) -> bool {
        if let Some(current) = &self.modem {
            tracing::warn!("Modem {} already selected, ignoring {}", current.path, path);
            return false;
        }

        let online = properties.get("Online").and_then(|v| v.as_bool()).unwrap_or(false);
        let powered = properties.get("Powered").and_then(|v| v.as_bool()).unwrap_or(false);
        tracing::info!("Selected modem {} (online: {}, powered: {})", path, online, powered);
        self.modem = Some(ModemState {
            path: path.to_string(),
            online,
            powered,
        });

        for key in modem_keys(path) {
            registry.subscribe(key).await;
        }

        if online {
            // No Powered change will be signalled for a modem that is already up.
            self.fetch_calls(path);
            self.emit(ModemEvent::Powered(true));
        } else {
            self.set_modem_powered(path, true);
        }
        true
    }

    /// Stops tracking the modem and asks oFono to power it off.
    pub fn remove_modem(&mut self, registry: &mut SubscriptionRegistry) {
        self.latest_select = None;
        let Some(modem) = self.modem.take() else {
            return;
        };
        tracing::info!("Removing modem {}", modem.path);
        for key in modem_keys(&modem.path) {
            registry.unsubscribe(&key);
        }
        if let Some(call) = self.call.take() {
            registry.unsubscribe(&call_key(&call.path));
        }
        self.set_modem_powered(&modem.path, false);
        // Power-off is not signalled back once the modem is untracked.
        self.emit(ModemEvent::Powered(false));
    }

    pub async fn handle_reply(
        &mut self,
        registry: &mut SubscriptionRegistry,
        id: OpId,
        reply: ModemReply,
    ) {
        let Some(op) = self.pending.take(id) else {
            tracing::debug!("Reply for unknown modem request {}", id);
            return;
        };

        match (op, reply) {
            (ModemOp::Select { wanted }, ModemReply::Objects(result)) => {
                if self.latest_select != Some(id) {
                    tracing::debug!("Dropping outdated modem lookup for {}", wanted);
                    return;
                }
                self.latest_select = None;
                let modems = match result {
                    Ok(modems) => modems,
                    Err(e) => {
                        tracing::error!("Failed to list modems: {}", e);
                        return;
                    }
                };
                let found = modems
                    .into_iter()
                    .find(|m| MacAddress::from_modem_path(&m.path).ok() == Some(wanted));
                match found {
                    Some(modem) => {
                        self.add_modem(registry, &modem.path, &modem.properties)
                            .await;
                    }
                    None => tracing::info!("No modem found for {}", wanted),
                }
            }
            (ModemOp::SetPowered { modem, powered }, ModemReply::Unit(result)) => {
                let Err(e) = result else {
                    tracing::debug!("Modem {} Powered={} accepted", modem, powered);
                    return;
                };
                tracing::error!("Failed to set modem {} Powered={}: {}", modem, powered, e);
                if powered {
                    self.check_powered(&modem, PowerCheck::AfterFailure(e.message().to_string()));
                }
            }
            (ModemOp::CheckPowered { modem, reason }, ModemReply::Properties(result)) => {
                let powered = self.is_tracked(&modem)
                    && result
                        .ok()
                        .and_then(|p| p.get("Powered").and_then(|v| v.as_bool()))
                        .unwrap_or(false);
                if powered {
                    return;
                }
                match reason {
                    PowerCheck::AfterFailure(message) if self.is_tracked(&modem) => {
                        self.emit(ModemEvent::SetPoweredFailed(message));
                    }
                    PowerCheck::AfterFailure(_) => {
                        tracing::debug!("Power failure of untracked modem {} ignored", modem);
                    }
                    PowerCheck::Watchdog if self.is_tracked(&modem) => {
                        tracing::warn!("Modem {} is not powered, powering it on", modem);
                        self.set_modem_powered(&modem, true);
                    }
                    PowerCheck::Watchdog => {}
                }
            }
            (ModemOp::GetCalls { modem }, ModemReply::Objects(result)) => {
                if !self.is_tracked(&modem) {
                    return;
                }
                match result {
                    Ok(calls) => {
                        for call in calls {
                            self.add_call(registry, &call.path, &call.properties).await;
                        }
                    }
                    Err(e) => tracing::error!("Failed to get calls of {}: {}", modem, e),
                }
            }
            (op, reply) => {
                tracing::warn!("Mismatched modem reply {:?} for {:?}", reply, op);
            }
        }
    }

    async fn add_call(
        &mut self,
        registry: &mut SubscriptionRegistry,
        path: &str,
        properties: &PropMap,
    ) {
        if let Some(call) = &self.call {
            tracing::info!("Call {} in progress, ignoring {}", call.path, path);
            return;
        }

        let text = |name: &str| {
            properties
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let call = ActiveCall {
            path: path.to_string(),
            state: text("State"),
            line_id: text("LineIdentification"),
        };
        tracing::info!("Call added: {} {:?} {:?}", path, call.state, call.line_id);

        registry.subscribe(call_key(path)).await;
        if let (Some(state), Some(line_id)) = (&call.state, &call.line_id) {
            self.emit(ModemEvent::CallChanged {
                state: state.clone(),
                line_id: line_id.clone(),
            });
        }
        self.call = Some(call);
    }

    fn remove_call(&mut self, registry: &mut SubscriptionRegistry, path: &str) {
        if !self.call.as_ref().is_some_and(|c| c.path == path) {
            tracing::debug!("Removed call {} is not tracked", path);
            return;
        }
        registry.unsubscribe(&call_key(path));
        self.call = None;
        tracing::info!("Call removed: {}", path);
    }

    pub async fn handle_signal(&mut self, registry: &mut SubscriptionRegistry, msg: &SignalMessage) {
        let interface = msg.key.interface.as_str();
        match (interface, &msg.body) {
            (ofono::MANAGER_IFACE, SignalBody::PathWithProperties(path, _)) => {
                match MacAddress::from_modem_path(path) {
                    Ok(address) => {
                        tracing::info!("Modem added: {} ({})", path, address);
                        self.emit(ModemEvent::Added(address));
                    }
                    Err(e) => tracing::debug!("Ignoring modem {}: {}", path, e),
                }
            }
            (ofono::MANAGER_IFACE, SignalBody::Path(path)) => {
                if self.is_tracked(path) {
                    self.remove_modem(registry);
                }
            }
            (ofono::MODEM_IFACE, SignalBody::PropertyChanged(name, value)) => {
                let path = msg.path().to_string();
                let Some(modem) = self.modem.as_mut().filter(|m| m.path == path) else {
                    return;
                };
                match name.as_str() {
                    "Powered" => {
                        let Some(powered) = value.as_bool() else { return };
                        modem.powered = powered;
                        tracing::info!("Modem {} powered {}", path, if powered { "ON" } else { "OFF" });
                        // Calls are requested once VoiceCallManager shows up in Interfaces.
                        self.emit(ModemEvent::Powered(powered));
                    }
                    "Online" => {
                        if let Some(online) = value.as_bool() {
                            modem.online = online;
                        }
                    }
                    "Interfaces" => {
                        let has_voice = value
                            .as_str_list()
                            .is_some_and(|l| l.iter().any(|i| i == ofono::VOICE_CALL_MANAGER_IFACE));
                        if has_voice {
                            self.fetch_calls(&path);
                        }
                    }
                    _ => {}
                }
            }
            (ofono::VOICE_CALL_MANAGER_IFACE, SignalBody::PathWithProperties(path, props)) => {
                self.add_call(registry, path, props).await;
            }
            (ofono::VOICE_CALL_MANAGER_IFACE, SignalBody::Path(path)) => {
                self.remove_call(registry, path);
            }
            (ofono::VOICE_CALL_IFACE, SignalBody::PropertyChanged(name, value)) => {
                let Some(call) = self.call.as_mut().filter(|c| c.path == msg.path()) else {
                    return;
                };
                match name.as_str() {
                    "State" => call.state = value.as_str().map(str::to_string),
                    "LineIdentification" => call.line_id = value.as_str().map(str::to_string),
                    _ => return,
                }
                let event = ModemEvent::CallChanged {
                    state: call.state.clone().unwrap_or_default(),
                    line_id: call.line_id.clone().unwrap_or_default(),
                };
                self.emit(event);
            }
            _ => {}
        }
    }

    pub fn dial(&self, number: &str) -> Result<CallFuture> {
        let modem = self.modem.as_ref().ok_or(PhoneError::NoModem)?.path.clone();
        if self.call.is_some() {
            return Err(PhoneError::CallInProgress);
        }
        tracing::info!("Dialing {}", number);
        let bus = self.bus.clone();
        let number = number.to_string();
        Ok(async move {
            let call = bus.dial(&modem, &number).await?;
            tracing::debug!("Dialed call {}", call);
            Ok(())
        }
        .boxed())
    }

    pub fn answer(&self) -> Result<CallFuture> {
        let call = self.call.as_ref().ok_or(PhoneError::NoActiveCall)?.path.clone();
        let bus = self.bus.clone();
        Ok(async move { bus.answer(&call).await.map_err(PhoneError::from) }.boxed())
    }

    pub fn hangup(&self) -> Result<CallFuture> {
        let call = self.call.as_ref().ok_or(PhoneError::NoActiveCall)?.path.clone();
        let bus = self.bus.clone();
        Ok(async move { bus.hangup(&call).await.map_err(PhoneError::from) }.boxed())
    }

    pub fn mute(&self, muted: bool) -> Result<CallFuture> {
        let modem = self.modem.as_ref().ok_or(PhoneError::NoModem)?.path.clone();
        if self.call.is_none() {
            return Err(PhoneError::NoActiveCall);
        }
        let bus = self.bus.clone();
        Ok(async move { bus.set_muted(&modem, muted).await.map_err(PhoneError::from) }.boxed())
    }
}
