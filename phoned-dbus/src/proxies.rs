//! zbus proxy definitions for the peer services.
//!
//! Only the members the daemon calls are declared. Per-object proxies
//! (adapters, modems, calls, sessions) have no default path and are built
//! with `builder(..).path(..)`.

use std::collections::HashMap;

use zbus::proxy;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

/// Interfaces of one managed object, keyed by interface name.
pub type InterfaceMap = HashMap<String, HashMap<String, OwnedValue>>;

/// Object path with an `a{sv}` property dictionary, as returned by the
/// oFono and ConnMan enumeration calls.
pub type PathProperties = Vec<(OwnedObjectPath, HashMap<String, OwnedValue>)>;

// BlueZ

/// Proxy for org.freedesktop.DBus.ObjectManager on the BlueZ root.
#[proxy(
    interface = "org.freedesktop.DBus.ObjectManager",
    default_service = "org.bluez",
    default_path = "/"
)]
pub trait BluezObjectManager {
    fn get_managed_objects(&self) -> zbus::Result<HashMap<OwnedObjectPath, InterfaceMap>>;
}

/// Proxy for org.bluez.Adapter1.
#[proxy(interface = "org.bluez.Adapter1", default_service = "org.bluez")]
pub trait Adapter1 {
    #[zbus(property)]
    fn powered(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn set_powered(&self, powered: bool) -> zbus::Result<()>;
}

// ConnMan

/// Proxy for net.connman.Manager.
#[proxy(
    interface = "net.connman.Manager",
    default_service = "net.connman",
    default_path = "/"
)]
pub trait ConnmanManager {
    fn get_technologies(&self) -> zbus::Result<PathProperties>;
}

/// Proxy for net.connman.Technology.
#[proxy(interface = "net.connman.Technology", default_service = "net.connman")]
pub trait Technology {
    fn set_property(&self, name: &str, value: &Value<'_>) -> zbus::Result<()>;
}

// oFono

/// Proxy for org.ofono.Manager.
#[proxy(
    interface = "org.ofono.Manager",
    default_service = "org.ofono",
    default_path = "/"
)]
pub trait OfonoManager {
    fn get_modems(&self) -> zbus::Result<PathProperties>;
}

/// Proxy for org.ofono.Modem.
#[proxy(interface = "org.ofono.Modem", default_service = "org.ofono")]
pub trait Modem {
    fn get_properties(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    fn set_property(&self, name: &str, value: &Value<'_>) -> zbus::Result<()>;
}

/// Proxy for org.ofono.VoiceCallManager.
#[proxy(interface = "org.ofono.VoiceCallManager", default_service = "org.ofono")]
pub trait VoiceCallManager {
    fn get_calls(&self) -> zbus::Result<PathProperties>;

    /// `hide_callerid` is "", "enabled" or "disabled"; "" keeps the network default.
    fn dial(&self, number: &str, hide_callerid: &str) -> zbus::Result<OwnedObjectPath>;
}

/// Proxy for org.ofono.VoiceCall.
#[proxy(interface = "org.ofono.VoiceCall", default_service = "org.ofono")]
pub trait VoiceCall {
    fn answer(&self) -> zbus::Result<()>;

    fn hangup(&self) -> zbus::Result<()>;
}

/// Proxy for org.ofono.CallVolume.
#[proxy(interface = "org.ofono.CallVolume", default_service = "org.ofono")]
pub trait CallVolume {
    fn set_property(&self, name: &str, value: &Value<'_>) -> zbus::Result<()>;
}

// obexd

/// Proxy for org.bluez.obex.Client1.
#[proxy(
    interface = "org.bluez.obex.Client1",
    default_service = "org.bluez.obex",
    default_path = "/org/bluez/obex"
)]
pub trait ObexClient {
    fn create_session(
        &self,
        destination: &str,
        args: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<OwnedObjectPath>;

    fn remove_session(&self, session: &ObjectPath<'_>) -> zbus::Result<()>;
}

/// Proxy for org.bluez.obex.PhonebookAccess1.
#[proxy(
    interface = "org.bluez.obex.PhonebookAccess1",
    default_service = "org.bluez.obex"
)]
pub trait PhonebookAccess {
    fn select(&self, location: &str, phonebook: &str) -> zbus::Result<()>;

    /// An empty `targetfile` lets obexd pick a temporary file.
    fn pull_all(
        &self,
        targetfile: &str,
        filters: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<(OwnedObjectPath, HashMap<String, OwnedValue>)>;
}
