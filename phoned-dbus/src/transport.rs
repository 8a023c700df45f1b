//! zbus-backed implementation of the bus traits.
//!
//! BlueZ, ConnMan and oFono live on the system bus; obexd lives on the
//! session bus. Each subscription gets its own match-rule stream and a
//! forwarding task that decodes the signal body and pushes it into the
//! caller's sink.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use zbus::message::Type as MessageType;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

use crate::bus::{
    AdapterBus, BusError, BusResult, ModemBus, ObjectInfo, PullFilter, SignalBus, SignalHandle,
    SignalSink, TechnologyBus, TransferBus, TransferStarted,
};
use crate::names::{bluez, obex, signals};
use crate::proxies::{
    Adapter1Proxy, BluezObjectManagerProxy, CallVolumeProxy, ConnmanManagerProxy, ModemProxy,
    ObexClientProxy, OfonoManagerProxy, PathProperties, PhonebookAccessProxy, TechnologyProxy,
    VoiceCallManagerProxy, VoiceCallProxy,
};
use crate::signal::{
    prop_map, BusScope, PropMap, PropValue, SignalBody, SignalMessage, SubscriptionKey,
};

/// Queue depth of each per-subscription message stream.
const SIGNAL_QUEUE_CAPACITY: usize = 64;

/// Connections to both message buses.
#[derive(Debug, Clone)]
pub struct DbusTransport {
    system: Connection,
    session: Connection,
}

impl DbusTransport {
    pub async fn connect() -> BusResult<Self> {
        let system = Connection::system().await?;
        let session = Connection::session().await?;
        Ok(Self::new(system, session))
    }

    pub fn new(system: Connection, session: Connection) -> Self {
        Self { system, session }
    }

    pub fn system(&self) -> &Connection {
        &self.system
    }

    pub fn session(&self) -> &Connection {
        &self.session
    }

    fn connection(&self, scope: BusScope) -> &Connection {
        match scope {
            BusScope::System => &self.system,
            BusScope::Session => &self.session,
        }
    }
}

fn match_rule(key: &SubscriptionKey) -> zbus::Result<MatchRule<'_>> {
    Ok(MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender(key.service.as_str())?
        .interface(key.interface.as_str())?
        .member(key.signal.as_str())?
        .path(key.path.as_str())?
        .build())
}

/// Decodes signal arguments according to the member name.
pub fn decode_body(signal: &str, msg: &Message) -> zbus::Result<SignalBody> {
    let body = msg.body();
    let decoded = match signal {
        signals::INTERFACES_ADDED => {
            let (path, interfaces) = body
                .deserialize::<(OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>)>()?;
            SignalBody::InterfacesAdded {
                path: path.to_string(),
                interfaces: interfaces
                    .iter()
                    .map(|(name, props)| (name.clone(), prop_map(props)))
                    .collect(),
            }
        }
        signals::INTERFACES_REMOVED => {
            let (path, interfaces) = body.deserialize::<(OwnedObjectPath, Vec<String>)>()?;
            SignalBody::InterfacesRemoved {
                path: path.to_string(),
                interfaces,
            }
        }
        signals::PROPERTIES_CHANGED => {
            let (interface, changed, _invalidated) =
                body.deserialize::<(String, HashMap<String, OwnedValue>, Vec<String>)>()?;
            SignalBody::PropertiesChanged {
                interface,
                changed: prop_map(&changed),
            }
        }
        signals::PROPERTY_CHANGED => {
            let (name, value) = body.deserialize::<(String, OwnedValue)>()?;
            SignalBody::PropertyChanged(name, (&value).into())
        }
        signals::MODEM_ADDED | signals::CALL_ADDED => {
            let (path, props) =
                body.deserialize::<(OwnedObjectPath, HashMap<String, OwnedValue>)>()?;
            SignalBody::PathWithProperties(path.to_string(), prop_map(&props))
        }
        signals::MODEM_REMOVED | signals::CALL_REMOVED => {
            let (path,) = body.deserialize::<(OwnedObjectPath,)>()?;
            SignalBody::Path(path.to_string())
        }
        _ => SignalBody::Empty,
    };
    Ok(decoded)
}

fn object_list(raw: PathProperties) -> Vec<ObjectInfo> {
    raw.into_iter()
        .map(|(path, props)| ObjectInfo::new(path.to_string(), prop_map(&props)))
        .collect()
}

fn object_path(path: &str) -> BusResult<ObjectPath<'_>> {
    ObjectPath::try_from(path).map_err(|e| BusError::InvalidReply(format!("{}: {}", path, e)))
}

#[async_trait]
impl SignalBus for DbusTransport {
    async fn subscribe(&self, key: &SubscriptionKey, sink: SignalSink) -> BusResult<SignalHandle> {
        let rule = match_rule(key)?;
        let mut stream = MessageStream::for_match_rule(
            rule,
            self.connection(key.scope),
            Some(SIGNAL_QUEUE_CAPACITY),
        )
        .await?;

        let key = key.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!("D-Bus stream error on {}: {}", key, e);
                        continue;
                    }
                };
                match decode_body(&key.signal, &msg) {
                    Ok(body) => {
                        if sink.send(SignalMessage::new(key.clone(), body)).is_err() {
                            tracing::debug!("Signal sink closed, stopping {}", key);
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Failed to decode {}: {}", key, e),
                }
            }
        });

        Ok(SignalHandle::new(task))
    }
}

#[async_trait]
impl AdapterBus for DbusTransport {
    async fn default_adapter(&self) -> BusResult<Option<ObjectInfo>> {
        let manager = BluezObjectManagerProxy::new(&self.system).await?;
        let objects = manager.get_managed_objects().await?;

        let mut adapters: Vec<ObjectInfo> = objects
            .iter()
            .filter_map(|(path, interfaces)| {
                interfaces
                    .get(bluez::ADAPTER_IFACE)
                    .map(|props| ObjectInfo::new(path.to_string(), prop_map(props)))
            })
            .collect();
        // Lowest path first, so hci0 wins over hci1.
        adapters.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(adapters.into_iter().next())
    }

    async fn devices(&self) -> BusResult<Vec<ObjectInfo>> {
        let manager = BluezObjectManagerProxy::new(&self.system).await?;
        let objects = manager.get_managed_objects().await?;

        Ok(objects
            .iter()
            .filter_map(|(path, interfaces)| {
                interfaces
                    .get(bluez::DEVICE_IFACE)
                    .map(|props| ObjectInfo::new(path.to_string(), prop_map(props)))
            })
            .collect())
    }

    async fn set_adapter_powered(&self, adapter: &str, powered: bool) -> BusResult<()> {
        let proxy = Adapter1Proxy::builder(&self.system)
            .path(adapter)?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;
        proxy.set_powered(powered).await?;
        Ok(())
    }
}

#[async_trait]
impl TechnologyBus for DbusTransport {
    async fn technologies(&self) -> BusResult<Vec<ObjectInfo>> {
        let manager = ConnmanManagerProxy::new(&self.system).await?;
        Ok(object_list(manager.get_technologies().await?))
    }

    async fn set_technology_powered(&self, technology: &str, powered: bool) -> BusResult<()> {
        let proxy = TechnologyProxy::builder(&self.system)
            .path(technology)?
            .build()
            .await?;
        proxy.set_property("Powered", &Value::from(powered)).await?;
        Ok(())
    }
}

#[async_trait]
impl ModemBus for DbusTransport {
    async fn modems(&self) -> BusResult<Vec<ObjectInfo>> {
        let manager = OfonoManagerProxy::new(&self.system).await?;
        Ok(object_list(manager.get_modems().await?))
    }

    async fn modem_properties(&self, modem: &str) -> BusResult<PropMap> {
        let proxy = ModemProxy::builder(&self.system).path(modem)?.build().await?;
        Ok(prop_map(&proxy.get_properties().await?))
    }

    async fn set_modem_powered(&self, modem: &str, powered: bool) -> BusResult<()> {
        let proxy = ModemProxy::builder(&self.system).path(modem)?.build().await?;
        proxy.set_property("Powered", &Value::from(powered)).await?;
        Ok(())
    }

    async fn calls(&self, modem: &str) -> BusResult<Vec<ObjectInfo>> {
        let proxy = VoiceCallManagerProxy::builder(&self.system)
            .path(modem)?
            .build()
            .await?;
        Ok(object_list(proxy.get_calls().await?))
    }

    async fn dial(&self, modem: &str, number: &str) -> BusResult<String> {
        let proxy = VoiceCallManagerProxy::builder(&self.system)
            .path(modem)?
            .build()
            .await?;
        let call = proxy.dial(number, "").await?;
        Ok(call.to_string())
    }

    async fn answer(&self, call: &str) -> BusResult<()> {
        let proxy = VoiceCallProxy::builder(&self.system).path(call)?.build().await?;
        proxy.answer().await?;
        Ok(())
    }

    async fn hangup(&self, call: &str) -> BusResult<()> {
        let proxy = VoiceCallProxy::builder(&self.system).path(call)?.build().await?;
        proxy.hangup().await?;
        Ok(())
    }

    async fn set_muted(&self, modem: &str, muted: bool) -> BusResult<()> {
        let proxy = CallVolumeProxy::builder(&self.system).path(modem)?.build().await?;
        proxy.set_property("Muted", &Value::from(muted)).await?;
        Ok(())
    }
}

#[async_trait]
impl TransferBus for DbusTransport {
    async fn create_session(&self, destination: &str) -> BusResult<String> {
        let client = ObexClientProxy::new(&self.session).await?;
        let mut args = HashMap::new();
        args.insert("Target", Value::from(obex::PBAP_TARGET));
        let session = client.create_session(destination, args).await?;
        if session.as_str().is_empty() {
            return Err(BusError::InvalidReply("CreateSession returned no session".into()));
        }
        Ok(session.to_string())
    }

    async fn remove_session(&self, session: &str) -> BusResult<()> {
        let client = ObexClientProxy::new(&self.session).await?;
        client.remove_session(&object_path(session)?).await?;
        Ok(())
    }

    async fn select_phonebook(&self, session: &str, location: &str, folder: &str) -> BusResult<()> {
        let proxy = PhonebookAccessProxy::builder(&self.session)
            .path(session)?
            .build()
            .await?;
        proxy.select(location, folder).await?;
        Ok(())
    }

    async fn pull_all(
        &self,
        session: &str,
        filters: HashMap<String, PullFilter>,
    ) -> BusResult<TransferStarted> {
        let proxy = PhonebookAccessProxy::builder(&self.session)
            .path(session)?
            .build()
            .await?;

        let filters: HashMap<&str, Value<'_>> = filters
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    PullFilter::Str(s) => Value::from(s.as_str()),
                    PullFilter::U16(n) => Value::from(*n),
                };
                (name.as_str(), value)
            })
            .collect();

        let (transfer, props) = proxy.pull_all("", filters).await?;
        let filename = props
            .get("Filename")
            .map(PropValue::from)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| BusError::InvalidReply("PullAll reply has no Filename".into()))?;

        Ok(TransferStarted {
            path: transfer.to_string(),
            filename,
        })
    }
}
