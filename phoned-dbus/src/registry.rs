//! Deduplicated signal subscriptions.
//!
//! Trackers re-subscribe every time a device, modem or call appears, and
//! those events repeat across pair/unpair and power cycles. The registry
//! keeps at most one live listener per [`SubscriptionKey`], so repeated
//! subscribe calls never stack up duplicate deliveries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::{SignalBus, SignalHandle, SignalSink};
use crate::signal::SubscriptionKey;

pub struct SubscriptionRegistry {
    bus: Arc<dyn SignalBus>,
    sink: SignalSink,
    handles: HashMap<SubscriptionKey, SignalHandle>,
}

impl SubscriptionRegistry {
    /// Subscriptions are registered on `bus` and delivered into `sink`.
    pub fn new(bus: Arc<dyn SignalBus>, sink: SignalSink) -> Self {
        Self {
            bus,
            sink,
            handles: HashMap::new(),
        }
    }

    /// Registers a listener for `key`.
    ///
    /// Returns `false` without side effects when the key is already
    /// subscribed, and `false` when the transport refused the match rule.
    /// Failures are not retried.
    pub async fn subscribe(&mut self, key: SubscriptionKey) -> bool {
        if self.handles.contains_key(&key) {
            tracing::debug!("Already subscribed to {}", key);
            return false;
        }

        match self.bus.subscribe(&key, self.sink.clone()).await {
            Ok(handle) => {
                tracing::debug!("Subscribed to {}", key);
                self.handles.insert(key, handle);
                true
            }
            Err(e) => {
                tracing::error!("Failed to subscribe to {}: {}", key, e);
                false
            }
        }
    }

    /// Removes the listener for `key`. Returns whether one existed.
    pub fn unsubscribe(&mut self, key: &SubscriptionKey) -> bool {
        match self.handles.remove(key) {
            Some(_handle) => {
                tracing::debug!("Unsubscribed from {}", key);
                true
            }
            None => false,
        }
    }

    /// Removes every listener whose key satisfies `pred`; returns how many.
    pub fn unsubscribe_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&SubscriptionKey) -> bool,
    {
        let before = self.handles.len();
        self.handles.retain(|key, _| {
            let remove = pred(key);
            if remove {
                tracing::debug!("Unsubscribed from {}", key);
            }
            !remove
        });
        before - self.handles.len()
    }

    pub fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Tears down every subscription.
    pub fn clear(&mut self) {
        let count = self.handles.len();
        self.handles.clear();
        tracing::debug!("Cleared {} signal subscriptions", count);
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.handles.len())
            .finish()
    }
}
