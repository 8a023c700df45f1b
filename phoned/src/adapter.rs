//! Default Bluetooth adapter presence and power.
//!
//! Watches BlueZ's object manager for the adapter coming and going, the
//! adapter's `Powered` property, and `Paired` transitions on devices.
//! Results are reported as [`AdapterEvent`]s; the orchestrator decides
//! what they mean for the wanted device.

use std::collections::HashSet;
use std::sync::Arc;

use phoned_dbus::names::{bluez, freedesktop, signals};
use phoned_dbus::{
    AdapterBus, MacAddress, ObjectInfo, PropMap, SignalBody, SignalMessage, SubscriptionKey,
    SubscriptionRegistry,
};

use crate::events::{AdapterEvent, Event, EventSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterState {
    pub path: String,
    pub powered: bool,
}

pub struct AdapterTracker<B> {
    bus: Arc<B>,
    events: EventSender,
    adapter: Option<AdapterState>,
    /// Devices known to be paired with the tracked adapter.
    paired: HashSet<MacAddress>,
}

fn manager_key(signal: &str) -> SubscriptionKey {
    SubscriptionKey::system(
        bluez::SERVICE,
        freedesktop::OBJECT_MANAGER_IFACE,
        bluez::ROOT_PATH,
        signal,
    )
}

fn properties_key(path: &str) -> SubscriptionKey {
    SubscriptionKey::system(
        bluez::SERVICE,
        freedesktop::PROPERTIES_IFACE,
        path,
        signals::PROPERTIES_CHANGED,
    )
}

fn device_address(path: &str, properties: &PropMap) -> Option<MacAddress> {
    MacAddress::from_device_path(path).ok().or_else(|| {
        properties
            .get("Address")
            .and_then(|v| v.as_str())
            .and_then(|a| MacAddress::normalize(a).ok())
    })
}

impl<B: AdapterBus + 'static> AdapterTracker<B> {
    pub fn new(bus: Arc<B>, events: EventSender) -> Self {
        Self {
            bus,
            events,
            adapter: None,
            paired: HashSet::new(),
        }
    }

    /// Subscribes to adapter arrival/removal and picks up an adapter that
    /// is already present, with its current power state and paired devices.
    pub async fn start(&mut self, registry: &mut SubscriptionRegistry) {
        registry.subscribe(manager_key(signals::INTERFACES_ADDED)).await;
        registry.subscribe(manager_key(signals::INTERFACES_REMOVED)).await;

        match self.bus.default_adapter().await {
            Ok(Some(adapter)) => {
                let powered = adapter.bool_property("Powered").unwrap_or(false);
                self.track(registry, &adapter.path, powered).await;
            }
            Ok(None) => tracing::info!("No Bluetooth adapter present"),
            Err(e) => tracing::error!("Failed to query the default adapter: {}", e),
        }

        if self.adapter.is_none() {
            return;
        }
        match self.bus.devices().await {
            Ok(devices) => {
                for device in devices {
                    self.add_device(registry, &device).await;
                }
            }
            Err(e) => tracing::warn!("Failed to list Bluetooth devices: {}", e),
        }
    }

    pub fn adapter(&self) -> Option<&AdapterState> {
        self.adapter.as_ref()
    }

    pub fn is_powered(&self) -> bool {
        self.adapter.as_ref().is_some_and(|a| a.powered)
    }

    pub fn is_paired(&self, address: &MacAddress) -> bool {
        self.paired.contains(address)
    }

    /// Powers the tracked adapter. Returns `false` without an adapter or
    /// when BlueZ refuses.
    pub async fn set_powered(&self, powered: bool) -> bool {
        let Some(adapter) = self.adapter.as_ref() else {
            tracing::warn!("No adapter to power {}", if powered { "on" } else { "off" });
            return false;
        };
        match self.bus.set_adapter_powered(&adapter.path, powered).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to set {} Powered={}: {}", adapter.path, powered, e);
                false
            }
        }
    }

    async fn track(&mut self, registry: &mut SubscriptionRegistry, path: &str, powered: bool) {
        tracing::info!("Tracking adapter {} (powered: {})", path, powered);
        self.adapter = Some(AdapterState {
            path: path.to_string(),
            powered,
        });
        registry.subscribe(properties_key(path)).await;
    }

    async fn add_device(&mut self, registry: &mut SubscriptionRegistry, device: &ObjectInfo) {
        registry.subscribe(properties_key(&device.path)).await;
        if device.bool_property("Paired") == Some(true) {
            if let Some(address) = device_address(&device.path, &device.properties) {
                self.paired.insert(address);
            }
        }
    }

    fn emit(&self, event: AdapterEvent) {
        if self.events.send(Event::Adapter(event)).is_err() {
            tracing::debug!("Event channel closed");
        }
    }

    pub async fn handle_signal(&mut self, registry: &mut SubscriptionRegistry, msg: &SignalMessage) {
        match &msg.body {
            SignalBody::InterfacesAdded { path, interfaces } => {
                if interfaces.contains_key(bluez::ADAPTER_IFACE) {
                    if self.adapter.is_some() {
                        tracing::debug!("Ignoring additional adapter {}", path);
                    } else {
                        // Power is reported by the following PropertiesChanged.
                        self.track(registry, path, false).await;
                        self.emit(AdapterEvent::Added(path.clone()));
                    }
                }
                if let Some(props) = interfaces.get(bluez::DEVICE_IFACE) {
                    let device = ObjectInfo::new(path.clone(), props.clone());
                    self.add_device(registry, &device).await;
                }
            }
            SignalBody::InterfacesRemoved { path, interfaces } => {
                if interfaces.iter().any(|i| i == bluez::ADAPTER_IFACE)
                    && self.adapter.as_ref().is_some_and(|a| &a.path == path)
                {
                    let children = format!("{}/", path);
                    let removed = registry.unsubscribe_where(|key| {
                        key.service == bluez::SERVICE
                            && key.interface == freedesktop::PROPERTIES_IFACE
                            && (key.path == *path || key.path.starts_with(children.as_str()))
                    });
                    tracing::info!("Adapter {} removed ({} subscriptions dropped)", path, removed);
                    self.adapter = None;
                    self.paired.clear();
                    self.emit(AdapterEvent::Removed(path.clone()));
                }
                if interfaces.iter().any(|i| i == bluez::DEVICE_IFACE) {
                    registry.unsubscribe(&properties_key(path));
                    if let Ok(address) = MacAddress::from_device_path(path) {
                        self.paired.remove(&address);
                    }
                    self.emit(AdapterEvent::DeviceRemoved(path.clone()));
                }
            }
            SignalBody::PropertiesChanged { interface, changed } => {
                let path = msg.path();
                if interface == bluez::ADAPTER_IFACE {
                    let Some(powered) = changed.get("Powered").and_then(|v| v.as_bool()) else {
                        return;
                    };
                    let Some(adapter) = self.adapter.as_mut().filter(|a| a.path == path) else {
                        return;
                    };
                    adapter.powered = powered;
                    tracing::info!("Adapter {} powered {}", path, if powered { "ON" } else { "OFF" });
                    self.emit(AdapterEvent::Powered(powered));
                } else if interface == bluez::DEVICE_IFACE {
                    if changed.get("Paired").and_then(|v| v.as_bool()) != Some(true) {
                        return;
                    }
                    if let Some(address) = device_address(path, changed) {
                        self.paired.insert(address);
                    }
                    tracing::info!("Device {} paired", path);
                    self.emit(AdapterEvent::DeviceCreated(path.to_string()));
                }
            }
            _ => {}
        }
    }
}
