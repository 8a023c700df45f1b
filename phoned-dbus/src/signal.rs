//! Typed signal keys and decoded signal payloads.
//!
//! Everything above the transport sees signals as [`SignalMessage`]s: the
//! [`SubscriptionKey`] that matched plus a [`SignalBody`] decoded from the
//! wire arguments. Property values are flattened into [`PropValue`], which
//! covers the handful of shapes the peers actually send.

use std::collections::HashMap;
use std::fmt;

use zbus::zvariant::{OwnedValue, Value};

/// Which message bus a subscription lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusScope {
    System,
    Session,
}

impl fmt::Display for BusScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusScope::System => f.write_str("SYSTEM"),
            BusScope::Session => f.write_str("SESSION"),
        }
    }
}

/// Identity of one signal subscription: (bus, sender, interface, path, member).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub scope: BusScope,
    pub service: String,
    pub interface: String,
    pub path: String,
    pub signal: String,
}

impl SubscriptionKey {
    pub fn new(
        scope: BusScope,
        service: &str,
        interface: &str,
        path: &str,
        signal: &str,
    ) -> Self {
        Self {
            scope,
            service: service.to_string(),
            interface: interface.to_string(),
            path: path.to_string(),
            signal: signal.to_string(),
        }
    }

    pub fn system(service: &str, interface: &str, path: &str, signal: &str) -> Self {
        Self::new(BusScope::System, service, interface, path, signal)
    }

    pub fn session(service: &str, interface: &str, path: &str, signal: &str) -> Self {
        Self::new(BusScope::Session, service, interface, path, signal)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.scope, self.service, self.interface, self.path, self.signal
        )
    }
}

/// A property value reduced to the shapes the daemon reads.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Str(String),
    StrList(Vec<String>),
    UInt(u64),
    Other,
}

impl PropValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            PropValue::StrList(list) => Some(list),
            _ => None,
        }
    }
}

impl From<&Value<'_>> for PropValue {
    fn from(value: &Value<'_>) -> Self {
        match value {
            Value::Bool(b) => PropValue::Bool(*b),
            Value::Str(s) => PropValue::Str(s.to_string()),
            Value::ObjectPath(p) => PropValue::Str(p.to_string()),
            Value::U8(n) => PropValue::UInt(u64::from(*n)),
            Value::U16(n) => PropValue::UInt(u64::from(*n)),
            Value::U32(n) => PropValue::UInt(u64::from(*n)),
            Value::U64(n) => PropValue::UInt(*n),
            Value::Value(inner) => PropValue::from(inner.as_ref()),
            Value::Array(array) => {
                let strings: Option<Vec<String>> = array
                    .iter()
                    .map(|item| match item {
                        Value::Str(s) => Some(s.to_string()),
                        Value::ObjectPath(p) => Some(p.to_string()),
                        _ => None,
                    })
                    .collect();
                strings.map(PropValue::StrList).unwrap_or(PropValue::Other)
            }
            _ => PropValue::Other,
        }
    }
}

impl From<&OwnedValue> for PropValue {
    fn from(value: &OwnedValue) -> Self {
        PropValue::from(&**value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

/// Property dictionary (`a{sv}`) after conversion.
pub type PropMap = HashMap<String, PropValue>;

/// Converts a raw `a{sv}` dictionary.
pub fn prop_map(raw: &HashMap<String, OwnedValue>) -> PropMap {
    raw.iter()
        .map(|(name, value)| (name.clone(), PropValue::from(value)))
        .collect()
}

/// Decoded arguments of a received signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalBody {
    Empty,
    /// `(o)`: ModemRemoved, CallRemoved.
    Path(String),
    /// `(oa{sv})`: ModemAdded, CallAdded.
    PathWithProperties(String, PropMap),
    /// `(sv)`: the single-property change signal used by oFono and ConnMan.
    PropertyChanged(String, PropValue),
    /// `(sa{sv}as)`: org.freedesktop.DBus.Properties.PropertiesChanged.
    PropertiesChanged {
        interface: String,
        changed: PropMap,
    },
    /// `(oa{sa{sv}})`: ObjectManager.InterfacesAdded.
    InterfacesAdded {
        path: String,
        interfaces: HashMap<String, PropMap>,
    },
    /// `(oas)`: ObjectManager.InterfacesRemoved.
    InterfacesRemoved {
        path: String,
        interfaces: Vec<String>,
    },
}

/// A signal delivered through a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub key: SubscriptionKey,
    pub body: SignalBody,
}

impl SignalMessage {
    pub fn new(key: SubscriptionKey, body: SignalBody) -> Self {
        Self { key, body }
    }

    /// Object path the signal was emitted from.
    pub fn path(&self) -> &str {
        &self.key.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_matches_legacy_layout() {
        let key = SubscriptionKey::system("org.ofono", "org.ofono.Manager", "/", "ModemAdded");
        assert_eq!(key.to_string(), "SYSTEM:org.ofono:org.ofono.Manager:/:ModemAdded");
    }

    #[test]
    fn test_prop_value_from_variant() {
        assert_eq!(PropValue::from(&Value::Bool(true)), PropValue::Bool(true));
        assert_eq!(PropValue::from(&Value::from("active")), PropValue::Str("active".into()));
        assert_eq!(PropValue::from(&Value::U16(7)), PropValue::UInt(7));

        let list = Value::from(vec!["org.ofono.VoiceCallManager", "org.ofono.CallVolume"]);
        assert_eq!(
            PropValue::from(&list),
            PropValue::StrList(vec![
                "org.ofono.VoiceCallManager".into(),
                "org.ofono.CallVolume".into()
            ])
        );

        let nested = Value::Value(Box::new(Value::Bool(false)));
        assert_eq!(PropValue::from(&nested), PropValue::Bool(false));
    }
}
