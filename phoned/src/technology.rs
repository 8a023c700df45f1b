//! ConnMan Bluetooth technology (radio soft-block) control.

use std::sync::Arc;

use phoned_dbus::names::{connman, signals};
use phoned_dbus::{
    BusError, SignalBody, SignalMessage, SubscriptionKey, SubscriptionRegistry, TechnologyBus,
};

pub struct TechnologyTracker<B> {
    bus: Arc<B>,
    /// Last Powered value seen. Informational only.
    powered: Option<bool>,
}

fn property_key(path: &str) -> SubscriptionKey {
    SubscriptionKey::system(
        connman::SERVICE,
        connman::TECHNOLOGY_IFACE,
        path,
        signals::PROPERTY_CHANGED,
    )
}

/// ConnMan answers a no-op toggle with an error; that is still success.
fn is_already_in_state(err: &BusError) -> bool {
    matches!(err.message(), connman::ALREADY_ENABLED | connman::ALREADY_DISABLED)
}

impl<B: TechnologyBus + 'static> TechnologyTracker<B> {
    pub fn new(bus: Arc<B>) -> Self {
        Self { bus, powered: None }
    }

    /// Subscribes to the Bluetooth technology's property changes and caches
    /// its current Powered state.
    pub async fn start(&mut self, registry: &mut SubscriptionRegistry) {
        match self.bluetooth_technology().await {
            Some((path, powered)) => {
                self.powered = powered;
                registry.subscribe(property_key(&path)).await;
            }
            None => tracing::warn!("ConnMan has no Bluetooth technology"),
        }
    }

    pub fn powered(&self) -> Option<bool> {
        self.powered
    }

    /// Looked up on every call; the object can disappear across power cycles.
    async fn bluetooth_technology(&self) -> Option<(String, Option<bool>)> {
        let technologies = match self.bus.technologies().await {
            Ok(technologies) => technologies,
            Err(e) => {
                tracing::error!("Failed to list ConnMan technologies: {}", e);
                return None;
            }
        };
        technologies
            .into_iter()
            .find(|t| t.str_property("Type") == Some(connman::BLUETOOTH_TYPE))
            .map(|t| {
                let powered = t.bool_property("Powered");
                (t.path, powered)
            })
    }

    pub async fn set_powered(&self, powered: bool) -> bool {
        let Some((path, _)) = self.bluetooth_technology().await else {
            tracing::error!("Bluetooth technology not found");
            return false;
        };

        match self.bus.set_technology_powered(&path, powered).await {
            Ok(()) => {
                tracing::info!("Bluetooth technology powered {}", if powered { "ON" } else { "OFF" });
                true
            }
            Err(e) if is_already_in_state(&e) => {
                tracing::debug!("Bluetooth technology already {}", e.message());
                true
            }
            Err(e) => {
                tracing::error!("Failed to set Bluetooth technology Powered={}: {}", powered, e);
                false
            }
        }
    }

    pub fn handle_signal(&mut self, msg: &SignalMessage) {
        if let SignalBody::PropertyChanged(name, value) = &msg.body {
            if name == "Powered" {
                if let Some(powered) = value.as_bool() {
                    tracing::debug!("Bluetooth technology Powered={}", powered);
                    self.powered = Some(powered);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{props, BusCall, MockBus};
    use phoned_dbus::{ObjectInfo, PropValue};
    use tokio::sync::mpsc;

    const TECH: &str = "/net/connman/technology/bluetooth";

    fn bus_with_technology() -> Arc<MockBus> {
        let bus = Arc::new(MockBus::new());
        bus.with(|s| {
            s.technologies = vec![
                ObjectInfo::new(
                    "/net/connman/technology/wifi",
                    props(&[("Type", PropValue::from("wifi"))]),
                ),
                ObjectInfo::new(
                    TECH,
                    props(&[
                        ("Type", PropValue::from("bluetooth")),
                        ("Powered", PropValue::Bool(false)),
                    ]),
                ),
            ];
        });
        bus
    }

    fn method_error(message: &str) -> BusError {
        BusError::Method {
            name: "net.connman.Error.Failed".into(),
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn test_set_powered_targets_bluetooth() {
        let bus = bus_with_technology();
        let tracker = TechnologyTracker::new(bus.clone());
        assert!(tracker.set_powered(true).await);
        assert_eq!(
            bus.count(|c| *c == BusCall::SetTechnologyPowered(TECH.into(), true)),
            1
        );
    }

    #[tokio::test]
    async fn test_already_in_state_is_success() {
        let bus = bus_with_technology();
        let tracker = TechnologyTracker::new(bus.clone());

        bus.with(|s| s.technology_error = Some(method_error("Already enabled")));
        assert!(tracker.set_powered(true).await);
        bus.with(|s| s.technology_error = Some(method_error("Already disabled")));
        assert!(tracker.set_powered(false).await);
        bus.with(|s| s.technology_error = Some(method_error("Not supported")));
        assert!(!tracker.set_powered(true).await);
    }

    #[tokio::test]
    async fn test_lookup_happens_per_call() {
        let bus = bus_with_technology();
        let tracker = TechnologyTracker::new(bus.clone());
        tracker.set_powered(true).await;
        tracker.set_powered(false).await;
        assert_eq!(bus.count(|c| *c == BusCall::Technologies), 2);

        bus.with(|s| s.technologies.clear());
        assert!(!tracker.set_powered(true).await);
    }

    #[tokio::test]
    async fn test_start_caches_and_follows_signal() {
        let bus = bus_with_technology();
        let (sink, _signals) = mpsc::unbounded_channel();
        let mut registry = SubscriptionRegistry::new(bus.clone(), sink);
        let mut tracker = TechnologyTracker::new(bus.clone());

        tracker.start(&mut registry).await;
        assert_eq!(tracker.powered(), Some(false));
        assert!(registry.is_subscribed(&property_key(TECH)));

        let msg = SignalMessage::new(
            property_key(TECH),
            SignalBody::PropertyChanged("Powered".into(), PropValue::Bool(true)),
        );
        tracker.handle_signal(&msg);
        assert_eq!(tracker.powered(), Some(true));
    }
}
