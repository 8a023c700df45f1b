//! D-Bus client library for the services a paired-phone session depends on:
//! BlueZ (adapter and devices), ConnMan (radio technology), oFono (modems
//! and voice calls) and obexd (phonebook transfers).
//!
//! The [`bus`] traits describe every remote call; [`DbusTransport`] backs
//! them with zbus. Signals are delivered through a [`SubscriptionRegistry`]
//! that never holds two listeners for the same [`SubscriptionKey`].

pub mod address;
pub mod bus;
pub mod names;
pub mod proxies;
pub mod registry;
pub mod signal;
pub mod transport;

pub use address::{colon_to_raw, raw_to_colon, AddressError, MacAddress};
pub use bus::{
    AdapterBus, BusError, BusResult, ModemBus, ObjectInfo, PhoneBus, PullFilter, SignalBus,
    SignalHandle, SignalSink, TechnologyBus, TransferBus, TransferStarted,
};
pub use registry::SubscriptionRegistry;
pub use signal::{
    prop_map, BusScope, PropMap, PropValue, SignalBody, SignalMessage, SubscriptionKey,
};
pub use transport::DbusTransport;
