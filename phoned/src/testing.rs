//! In-memory bus for unit tests.
//!
//! Records every remote call and answers from scripted state. Signals
//! are not delivered by the bus; tests hand [`SignalMessage`]s straight
//! to the component under test.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use phoned_dbus::{
    AdapterBus, BusError, BusResult, ModemBus, ObjectInfo, PropMap, PropValue, PullFilter,
    SignalBus, SignalHandle, SignalSink, SubscriptionKey, TechnologyBus, TransferBus,
    TransferStarted,
};

#[derive(Debug, Clone, PartialEq)]
pub enum BusCall {
    Subscribe(SubscriptionKey),
    DefaultAdapter,
    Devices,
    SetAdapterPowered(String, bool),
    Technologies,
    SetTechnologyPowered(String, bool),
    Modems,
    ModemProperties(String),
    SetModemPowered(String, bool),
    Calls(String),
    Dial(String, String),
    Answer(String),
    Hangup(String),
    SetMuted(String, bool),
    CreateSession(String),
    RemoveSession(String),
    SelectPhonebook(String, String, String),
    PullAll(String, Option<u16>),
}

#[derive(Debug, Default)]
pub struct MockState {
    pub calls: Vec<BusCall>,
    pub adapter: Option<ObjectInfo>,
    pub devices: Vec<ObjectInfo>,
    pub technologies: Vec<ObjectInfo>,
    pub technology_error: Option<BusError>,
    pub modems: Vec<ObjectInfo>,
    /// Powered property reported per modem path.
    pub modem_powered: HashMap<String, bool>,
    pub modem_powered_error: Option<BusError>,
    pub voice_calls: Vec<ObjectInfo>,
    pub call_error: Option<BusError>,
    /// Replies for the next CreateSession calls; defaults to a fresh path.
    pub session_replies: VecDeque<BusResult<String>>,
    pub sessions_created: usize,
    pub select_error: Option<BusError>,
    /// Replies for the next PullAll calls; defaults to a fresh transfer.
    pub pull_replies: VecDeque<BusResult<TransferStarted>>,
    pub transfers_started: usize,
    pub subscribe_error: Option<BusError>,
}

#[derive(Debug, Default)]
pub struct MockBus {
    state: Mutex<MockState>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the scripted state.
    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.with(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    /// How many recorded calls satisfy `pred`.
    pub fn count(&self, pred: impl Fn(&BusCall) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(c)).count())
    }

    fn record(&self, call: BusCall) {
        self.with(|s| s.calls.push(call));
    }
}

pub fn props(entries: &[(&str, PropValue)]) -> PropMap {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

#[async_trait]
impl SignalBus for MockBus {
    async fn subscribe(&self, key: &SubscriptionKey, _sink: SignalSink) -> BusResult<SignalHandle> {
        self.record(BusCall::Subscribe(key.clone()));
        match self.with(|s| s.subscribe_error.clone()) {
            Some(err) => Err(err),
            None => Ok(SignalHandle::detached()),
        }
    }
}

#[async_trait]
impl AdapterBus for MockBus {
    async fn default_adapter(&self) -> BusResult<Option<ObjectInfo>> {
        self.record(BusCall::DefaultAdapter);
        Ok(self.with(|s| s.adapter.clone()))
    }

    async fn devices(&self) -> BusResult<Vec<ObjectInfo>> {
        self.record(BusCall::Devices);
        Ok(self.with(|s| s.devices.clone()))
    }

    async fn set_adapter_powered(&self, adapter: &str, powered: bool) -> BusResult<()> {
        self.record(BusCall::SetAdapterPowered(adapter.to_string(), powered));
        Ok(())
    }
}

#[async_trait]
impl TechnologyBus for MockBus {
    async fn technologies(&self) -> BusResult<Vec<ObjectInfo>> {
        self.record(BusCall::Technologies);
        Ok(self.with(|s| s.technologies.clone()))
    }

    async fn set_technology_powered(&self, technology: &str, powered: bool) -> BusResult<()> {
        self.record(BusCall::SetTechnologyPowered(technology.to_string(), powered));
        match self.with(|s| s.technology_error.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ModemBus for MockBus {
    async fn modems(&self) -> BusResult<Vec<ObjectInfo>> {
        self.record(BusCall::Modems);
        Ok(self.with(|s| s.modems.clone()))
    }

    async fn modem_properties(&self, modem: &str) -> BusResult<PropMap> {
        self.record(BusCall::ModemProperties(modem.to_string()));
        let powered = self.with(|s| s.modem_powered.get(modem).copied().unwrap_or(false));
        Ok(props(&[("Powered", PropValue::Bool(powered))]))
    }

    async fn set_modem_powered(&self, modem: &str, powered: bool) -> BusResult<()> {
        self.record(BusCall::SetModemPowered(modem.to_string(), powered));
        match self.with(|s| s.modem_powered_error.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn calls(&self, modem: &str) -> BusResult<Vec<ObjectInfo>> {
        self.record(BusCall::Calls(modem.to_string()));
        Ok(self.with(|s| s.voice_calls.clone()))
    }

    async fn dial(&self, modem: &str, number: &str) -> BusResult<String> {
        self.record(BusCall::Dial(modem.to_string(), number.to_string()));
        match self.with(|s| s.call_error.clone()) {
            Some(err) => Err(err),
            None => Ok(format!("{}/voicecall01", modem)),
        }
    }

    async fn answer(&self, call: &str) -> BusResult<()> {
        self.record(BusCall::Answer(call.to_string()));
        match self.with(|s| s.call_error.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn hangup(&self, call: &str) -> BusResult<()> {
        self.record(BusCall::Hangup(call.to_string()));
        match self.with(|s| s.call_error.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn set_muted(&self, modem: &str, muted: bool) -> BusResult<()> {
        self.record(BusCall::SetMuted(modem.to_string(), muted));
        Ok(())
    }
}

#[async_trait]
impl TransferBus for MockBus {
    async fn create_session(&self, destination: &str) -> BusResult<String> {
        self.record(BusCall::CreateSession(destination.to_string()));
        self.with(|s| {
            s.sessions_created += 1;
            let n = s.sessions_created;
            s.session_replies
                .pop_front()
                .unwrap_or_else(|| Ok(format!("/org/bluez/obex/client/session{}", n)))
        })
    }

    async fn remove_session(&self, session: &str) -> BusResult<()> {
        self.record(BusCall::RemoveSession(session.to_string()));
        Ok(())
    }

    async fn select_phonebook(&self, session: &str, location: &str, folder: &str) -> BusResult<()> {
        self.record(BusCall::SelectPhonebook(
            session.to_string(),
            location.to_string(),
            folder.to_string(),
        ));
        match self.with(|s| s.select_error.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn pull_all(
        &self,
        session: &str,
        filters: HashMap<String, PullFilter>,
    ) -> BusResult<TransferStarted> {
        let max_count = match filters.get("MaxCount") {
            Some(PullFilter::U16(n)) => Some(*n),
            _ => None,
        };
        self.record(BusCall::PullAll(session.to_string(), max_count));
        let session = session.to_string();
        self.with(|s| {
            s.transfers_started += 1;
            let n = s.transfers_started;
            s.pull_replies.pop_front().unwrap_or_else(|| {
                Ok(TransferStarted {
                    path: format!("{}/transfer{}", session, n),
                    filename: format!("/tmp/phoned-test-transfer{}.vcf", n),
                })
            })
        })
    }
}
