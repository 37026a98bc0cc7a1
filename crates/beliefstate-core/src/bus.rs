//! Event bus: routes events and service events to subscribed plugins.
//!
//! Delivery is synchronous and follows registry load order. A message with
//! no subscribers is dropped with a warning. A subscriber that panics still
//! counts as invoked; the panic is tallied separately. Either way the bus owns the
//! message and releases its payload once dispatch is done.

use beliefstate_plugin::{Event, ServiceEvent};

use crate::registry::{Delivery, PluginRegistry};

/// Running counters kept by the bus.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub events_spread: u64,
    pub events_dropped: u64,
    pub service_events_spread: u64,
    pub service_events_dropped: u64,
    /// Hand-offs to individual plugins, including ones that panicked.
    pub deliveries: u64,
    /// Hand-offs aborted by a contained plugin panic.
    pub panics: u64,
}

#[derive(Debug, Default)]
pub struct EventBus {
    stats: BusStats,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    fn tally(&mut self, delivery: Delivery) -> bool {
        match delivery {
            Delivery::Consumed => {}
            Delivery::Panicked => self.stats.panics += 1,
            Delivery::NotLoaded => return false,
        }
        self.stats.deliveries += 1;
        true
    }

    /// Deliver `event` to every plugin subscribed to its name and return how
    /// many were invoked.
    pub fn spread_event(&mut self, registry: &mut PluginRegistry, event: Event) -> usize {
        let subscribers = registry.event_subscribers(&event.name).to_vec();
        let delivered = subscribers
            .into_iter()
            .filter(|id| self.tally(registry.deliver_event(*id, &event)))
            .count();

        self.stats.events_spread += 1;
        if delivered == 0 {
            self.stats.events_dropped += 1;
            tracing::warn!(
                event = %event.name,
                content = %event.render_payload(),
                "unhandled event dropped"
            );
        } else {
            tracing::trace!(event = %event.name, delivered, "event spread");
        }
        delivered
    }

    /// Deliver `event` to every plugin serving its service name and return
    /// how many were invoked.
    pub fn spread_service_event(
        &mut self,
        registry: &mut PluginRegistry,
        event: ServiceEvent,
    ) -> usize {
        let servers = registry.service_subscribers(&event.service_name).to_vec();
        let delivered = servers
            .into_iter()
            .filter(|id| self.tally(registry.deliver_service_event(*id, &event)))
            .count();

        self.stats.service_events_spread += 1;
        if delivered == 0 {
            self.stats.service_events_dropped += 1;
            tracing::warn!(
                service = %event.service_name,
                content = %event.render_payload(),
                "unhandled service event dropped"
            );
        } else {
            tracing::trace!(service = %event.service_name, delivered, "service event spread");
        }
        delivered
    }
}
