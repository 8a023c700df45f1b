//! Well-known bus names, interfaces and signal members of the peer services.
//!
//! Grouped per service so call sites read as `names::ofono::MODEM_IFACE`.

/// Standard freedesktop interfaces shared by every peer.
pub mod freedesktop {
    pub const OBJECT_MANAGER_IFACE: &str = "org.freedesktop.DBus.ObjectManager";
    pub const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";
}

/// BlueZ adapter manager (system bus).
pub mod bluez {
    pub const SERVICE: &str = "org.bluez";
    pub const ADAPTER_IFACE: &str = "org.bluez.Adapter1";
    pub const DEVICE_IFACE: &str = "org.bluez.Device1";
    /// Root object carrying the ObjectManager interface.
    pub const ROOT_PATH: &str = "/";
}

/// ConnMan network-technology manager (system bus).
pub mod connman {
    pub const SERVICE: &str = "net.connman";
    pub const MANAGER_IFACE: &str = "net.connman.Manager";
    pub const TECHNOLOGY_IFACE: &str = "net.connman.Technology";
    pub const MANAGER_PATH: &str = "/";
    /// Value of the technology `Type` property for the Bluetooth radio.
    pub const BLUETOOTH_TYPE: &str = "bluetooth";
    /// Error messages ConnMan returns when the radio is already in the requested state.
    pub const ALREADY_ENABLED: &str = "Already enabled";
    pub const ALREADY_DISABLED: &str = "Already disabled";
}

/// oFono cellular-modem manager (system bus).
pub mod ofono {
    pub const SERVICE: &str = "org.ofono";
    pub const MANAGER_IFACE: &str = "org.ofono.Manager";
    pub const MODEM_IFACE: &str = "org.ofono.Modem";
    pub const VOICE_CALL_MANAGER_IFACE: &str = "org.ofono.VoiceCallManager";
    pub const VOICE_CALL_IFACE: &str = "org.ofono.VoiceCall";
    pub const CALL_VOLUME_IFACE: &str = "org.ofono.CallVolume";
    pub const MANAGER_PATH: &str = "/";
}

/// obexd object-push and phonebook-access service (session bus).
pub mod obex {
    pub const SERVICE: &str = "org.bluez.obex";
    pub const CLIENT_IFACE: &str = "org.bluez.obex.Client1";
    pub const PHONEBOOK_IFACE: &str = "org.bluez.obex.PhonebookAccess1";
    pub const TRANSFER_IFACE: &str = "org.bluez.obex.Transfer1";
    pub const CLIENT_PATH: &str = "/org/bluez/obex";
    /// Session target for phonebook access.
    pub const PBAP_TARGET: &str = "PBAP";
}

/// Signal member names.
pub mod signals {
    pub const INTERFACES_ADDED: &str = "InterfacesAdded";
    pub const INTERFACES_REMOVED: &str = "InterfacesRemoved";
    pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";
    pub const PROPERTY_CHANGED: &str = "PropertyChanged";
    pub const MODEM_ADDED: &str = "ModemAdded";
    pub const MODEM_REMOVED: &str = "ModemRemoved";
    pub const CALL_ADDED: &str = "CallAdded";
    pub const CALL_REMOVED: &str = "CallRemoved";
}
