//! Cycle scheduler, the tick driver.
//!
//! Each tick cycles every plugin in load order, concatenates their output
//! and feeds it to the [`EventBus`]: all events first, then all service
//! events. The loop runs until a [`ShutdownHandle`] moves the run state from
//! `Running` to `Stopped`; an in-flight tick always completes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beliefstate_plugin::{CycleResult, Event, ServiceEvent};

use crate::bus::{BusStats, EventBus};
use crate::registry::PluginRegistry;

// ─── Run state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Running = 0,
    Stopped = 1,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        if raw == RunState::Running as u8 {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }
}

/// Single writer of the `Running → Stopped` transition.
///
/// Cheap to clone and safe to move into a signal listener thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    state: Arc<AtomicU8>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RunState::Running as u8)),
        }
    }

    /// Request shutdown. Returns `true` for the call that performed the
    /// transition; later calls are no-ops.
    pub fn trigger(&self) -> bool {
        let transitioned = self
            .state
            .compare_exchange(
                RunState::Running as u8,
                RunState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if transitioned {
            tracing::info!("shutdown requested, finishing current tick");
        }
        transitioned
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────────

/// Summary of one completed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// 1-based tick number.
    pub tick: u64,
    /// Conjunction of every plugin's cycle success flag.
    pub success: bool,
    pub events: usize,
    pub service_events: usize,
    /// Plugin hand-offs performed while dispatching this tick's batches.
    pub deliveries: u64,
    /// Messages of this tick that found no recipient.
    pub dropped: u64,
    /// Deliveries of this tick aborted by a plugin panic.
    pub panics: u64,
}

pub struct Scheduler {
    registry: PluginRegistry,
    bus: EventBus,
    shutdown: ShutdownHandle,
    tick_interval: Duration,
    ticks: u64,
    injected_events: VecDeque<Event>,
    injected_service_events: VecDeque<ServiceEvent>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.shutdown.state())
            .field("ticks", &self.ticks)
            .field("tick_interval", &self.tick_interval)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(registry: PluginRegistry, tick_interval: Duration) -> Self {
        Self::with_shutdown(registry, tick_interval, ShutdownHandle::new())
    }

    /// Build a scheduler driven by an existing handle, e.g. one already
    /// handed to plugins or a signal listener.
    pub fn with_shutdown(
        registry: PluginRegistry,
        tick_interval: Duration,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            registry,
            bus: EventBus::new(),
            shutdown,
            tick_interval,
            ticks: 0,
            injected_events: VecDeque::new(),
            injected_service_events: VecDeque::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> RunState {
        self.shutdown.state()
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    /// Queue a host event at the head of the next tick's event batch.
    pub fn inject_event(&mut self, event: Event) {
        self.injected_events.push_back(event);
    }

    /// Queue a host service event at the head of the next tick's service
    /// event batch.
    pub fn inject_service_event(&mut self, event: ServiceEvent) {
        self.injected_service_events.push_back(event);
    }

    /// Spread one event immediately, outside of any tick.
    pub fn dispatch_event(&mut self, event: Event) -> usize {
        self.bus.spread_event(&mut self.registry, event)
    }

    pub fn dispatch_service_event(&mut self, event: ServiceEvent) -> usize {
        self.bus.spread_service_event(&mut self.registry, event)
    }

    /// Run one tick. Returns `None` without doing anything once stopped.
    pub fn tick(&mut self) -> Option<TickReport> {
        if self.shutdown.is_stopped() {
            return None;
        }

        let mut batch = CycleResult::ok();
        batch.events.extend(self.injected_events.drain(..));
        batch
            .service_events
            .extend(self.injected_service_events.drain(..));
        batch.merge(self.registry.cycle_all());

        let before = self.bus.stats();
        let events = batch.events.len();
        let service_events = batch.service_events.len();

        for event in batch.events {
            self.bus.spread_event(&mut self.registry, event);
        }
        for event in batch.service_events {
            self.bus.spread_service_event(&mut self.registry, event);
        }

        let after = self.bus.stats();
        self.ticks += 1;
        let report = TickReport {
            tick: self.ticks,
            success: batch.success,
            events,
            service_events,
            deliveries: after.deliveries - before.deliveries,
            dropped: (after.events_dropped + after.service_events_dropped)
                - (before.events_dropped + before.service_events_dropped),
            panics: after.panics - before.panics,
        };
        tracing::trace!(?report, "tick complete");
        Some(report)
    }

    /// Tick until stopped, sleeping the tick interval between ticks.
    pub fn run(&mut self) {
        tracing::info!(
            plugins = self.registry.len(),
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "scheduler running"
        );
        while self.tick().is_some() {
            if !self.tick_interval.is_zero() && !self.shutdown.is_stopped() {
                std::thread::sleep(self.tick_interval);
            }
        }
        let stats = self.bus.stats();
        tracing::info!(
            ticks = self.ticks,
            events = stats.events_spread,
            service_events = stats.service_events_spread,
            dropped = stats.events_dropped + stats.service_events_dropped,
            panics = stats.panics,
            "scheduler stopped"
        );
    }

    pub fn into_registry(self) -> PluginRegistry {
        self.registry
    }
}
