//! Messages exchanged between plugins through the host bus.
//!
//! Payloads are opaque to the host: it only forwards them, renders them
//! for diagnostics when nobody was listening, and drops them once the
//! dispatch pass that carried them is over.

use std::any::Any;
use std::fmt;

// ─── Payload ────────────────────────────────────────────────────────────

/// Opaque message content.
///
/// Implemented for every `Debug + Send + 'static` type, so plugins can
/// attach whatever they like (a `serde_json::Value`, a domain struct...)
/// and recover it with [`Event::payload_as`].
pub trait Payload: Any + fmt::Debug + Send {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marker printed in place of an absent payload.
pub const NO_CONTENT: &str = "no content";

fn render(payload: Option<&dyn Payload>) -> String {
    match payload {
        Some(p) => format!("{p:#?}"),
        None => NO_CONTENT.to_string(),
    }
}

fn downcast<T: Any>(payload: Option<&dyn Payload>) -> Option<&T> {
    payload.and_then(|p| p.as_any().downcast_ref::<T>())
}

// ─── Event ──────────────────────────────────────────────────────────────

/// A fire-and-forget named message.
#[derive(Debug)]
pub struct Event {
    pub name: String,
    pub payload: Option<Box<dyn Payload>>,
}

impl Event {
    /// An event without content.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    /// An event carrying `payload`.
    pub fn with_payload(name: impl Into<String>, payload: impl Payload) -> Self {
        Self {
            name: name.into(),
            payload: Some(Box::new(payload)),
        }
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Borrow the payload as a concrete type, if it is one.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        downcast(self.payload.as_deref())
    }

    /// Human-readable rendering of the payload, or [`NO_CONTENT`].
    pub fn render_payload(&self) -> String {
        render(self.payload.as_deref())
    }
}

// ─── Service event ──────────────────────────────────────────────────────

/// A named one-shot request broadcast to every plugin serving that name.
///
/// There is no reply channel: a handler answers by deploying a later
/// [`Event`] or [`ServiceEvent`] of its own.
#[derive(Debug)]
pub struct ServiceEvent {
    pub service_name: String,
    pub payload: Option<Box<dyn Payload>>,
}

impl ServiceEvent {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            payload: None,
        }
    }

    pub fn with_payload(service_name: impl Into<String>, payload: impl Payload) -> Self {
        Self {
            service_name: service_name.into(),
            payload: Some(Box::new(payload)),
        }
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        downcast(self.payload.as_deref())
    }

    pub fn render_payload(&self) -> String {
        render(self.payload.as_deref())
    }
}

// ─── Cycle result ───────────────────────────────────────────────────────

/// Output of one `cycle` call, per plugin or aggregated over all of them.
///
/// Insertion order is dispatch order.
#[derive(Debug)]
pub struct CycleResult {
    pub success: bool,
    pub events: Vec<Event>,
    pub service_events: Vec<ServiceEvent>,
}

impl Default for CycleResult {
    fn default() -> Self {
        Self::ok()
    }
}

impl CycleResult {
    /// A successful, empty result.
    pub fn ok() -> Self {
        Self {
            success: true,
            events: Vec::new(),
            service_events: Vec::new(),
        }
    }

    /// A failed, empty result. Events added afterwards are still dispatched.
    pub fn failed() -> Self {
        Self {
            success: false,
            ..Self::ok()
        }
    }

    pub fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn push_service_event(&mut self, event: ServiceEvent) {
        self.service_events.push(event);
    }

    /// Builder-style variant of [`push_event`](Self::push_event).
    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_service_event(mut self, event: ServiceEvent) -> Self {
        self.service_events.push(event);
        self
    }

    /// Append `other` after the messages already held. The success flag
    /// becomes the conjunction of both.
    pub fn merge(&mut self, other: CycleResult) {
        self.success &= other.success;
        self.events.extend(other.events);
        self.service_events.extend(other.service_events);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.service_events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Designator {
        kind: &'static str,
        value: i32,
    }

    #[test]
    fn test_event_without_payload() {
        let event = Event::new("tick");
        assert_eq!(event.name, "tick");
        assert!(!event.has_payload());
        assert_eq!(event.render_payload(), NO_CONTENT);
        assert!(event.payload_as::<String>().is_none());
    }

    #[test]
    fn test_event_payload_downcast() {
        let event = Event::with_payload(
            "set-experiment-meta-data",
            Designator {
                kind: "action",
                value: 3,
            },
        );
        let d = event.payload_as::<Designator>().expect("payload type");
        assert_eq!(d.kind, "action");
        assert_eq!(d.value, 3);
        assert!(event.payload_as::<String>().is_none());
    }

    #[test]
    fn test_json_payload_rendering() {
        let event = Event::with_payload("annotate", serde_json::json!({"field": "name"}));
        let rendered = event.render_payload();
        assert!(rendered.contains("field"));
        assert!(rendered.contains("name"));
    }

    #[test]
    fn test_service_event_payload() {
        let svc = ServiceEvent::with_payload("predict", String::from("grasp"));
        assert_eq!(svc.service_name, "predict");
        assert_eq!(svc.payload_as::<String>().map(String::as_str), Some("grasp"));
        assert_eq!(ServiceEvent::new("load").render_payload(), NO_CONTENT);
    }

    #[derive(Debug)]
    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_payload_released_once_with_event() {
        let drops = Arc::new(AtomicUsize::new(0));
        let event = Event::with_payload("x", DropCounter(drops.clone()));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(event);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    // ── CycleResult ───────────────────────────────────────────────────

    #[test]
    fn test_cycle_result_merge_keeps_order_and_conjunction() {
        let mut total = CycleResult::ok().with_event(Event::new("a"));
        let failed = CycleResult::failed()
            .with_event(Event::new("b"))
            .with_service_event(ServiceEvent::new("s"));

        total.merge(failed);
        total.merge(CycleResult::ok().with_event(Event::new("c")));

        assert!(!total.success);
        let names: Vec<_> = total.events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(total.service_events.len(), 1);
    }

    #[test]
    fn test_cycle_result_default_is_ok_and_empty() {
        let result = CycleResult::default();
        assert!(result.success);
        assert!(result.is_empty());
    }
}
