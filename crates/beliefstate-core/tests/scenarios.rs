mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beliefstate_core::plugin::{CycleResult, Event, Plugin, PluginContext, PluginResult};
use beliefstate_core::{
    Beliefstate, CoreError, PluginRegistry, Scheduler, Settings, StaticLoader,
};
use common::{entries, loader, DropCounter, Journal, Script};

fn scheduler(scripts: Vec<(&'static str, Script)>, journal: &Journal) -> Scheduler {
    let names: Vec<_> = scripts.iter().map(|(name, _)| *name).collect();
    let mut registry = PluginRegistry::new(loader(scripts, journal), Vec::new());
    for name in names {
        registry.load_plugin(name, true).unwrap();
    }
    Scheduler::new(registry, Duration::ZERO)
}

// ── Dispatch ──────────────────────────────────────────────────────────

#[test]
fn test_tick_tock_over_n_ticks() {
    let journal = Journal::default();
    let mut scheduler = scheduler(
        vec![
            ("x", Script::new().listen("tick").emit("tock")),
            ("y", Script::new().listen("tock")),
        ],
        &journal,
    );

    const N: usize = 7;
    for _ in 0..N {
        scheduler.tick().unwrap();
    }

    assert_eq!(entries(&journal, "y<-tock").len(), N);
    assert!(entries(&journal, "x<-").is_empty());
    assert_eq!(scheduler.bus_stats().events_dropped, 0);
    assert_eq!(scheduler.bus_stats().events_spread, N as u64);
}

#[test]
fn test_batch_follows_load_order() {
    let journal = Journal::default();
    let mut scheduler = scheduler(
        vec![
            ("a", Script::new().emit("from-a")),
            ("b", Script::new().emit("from-b")),
            ("c", Script::new().emit("from-c")),
            (
                "sink",
                Script::new()
                    .listen("from-c")
                    .listen("from-a")
                    .listen("from-b"),
            ),
        ],
        &journal,
    );

    let report = scheduler.tick().unwrap();

    assert_eq!(report.events, 3);
    assert_eq!(
        entries(&journal, "sink<-"),
        ["sink<-from-a", "sink<-from-b", "sink<-from-c"]
    );
}

#[test]
fn test_events_dispatched_before_service_events() {
    let journal = Journal::default();
    let mut scheduler = scheduler(
        vec![
            ("planner", Script::new().emit_service("plan").emit("planned")),
            ("worker", Script::new().serve("plan").listen("planned")),
        ],
        &journal,
    );

    let report = scheduler.tick().unwrap();

    assert_eq!(report.service_events, 1);
    assert_eq!(
        entries(&journal, "worker<-"),
        ["worker<-planned", "worker<-svc:plan"]
    );
}

#[test]
fn test_unsubscribed_messages_are_dropped_and_counted() {
    let journal = Journal::default();
    let mut scheduler = scheduler(
        vec![(
            "loner",
            Script::new().emit("nobody-cares").emit_service("no-such-service"),
        )],
        &journal,
    );

    let report = scheduler.tick().unwrap();

    assert_eq!(report.deliveries, 0);
    assert_eq!(report.dropped, 2);
    let stats = scheduler.bus_stats();
    assert_eq!(stats.events_dropped, 1);
    assert_eq!(stats.service_events_dropped, 1);
}

#[test]
fn test_deployed_messages_precede_cycle_output() {
    let journal = Journal::default();
    let mut scheduler = scheduler(
        vec![
            ("pinger", Script::new().emit("ping")),
            (
                "ponger",
                Script::new().listen("ping").reply("ping", "pong").emit("own"),
            ),
            ("observer", Script::new().listen("pong").listen("own")),
        ],
        &journal,
    );

    scheduler.tick().unwrap();
    assert_eq!(entries(&journal, "observer<-"), ["observer<-own"]);

    scheduler.tick().unwrap();
    assert_eq!(
        entries(&journal, "observer<-"),
        ["observer<-own", "observer<-pong", "observer<-own"]
    );
}

// ── Subscriptions ─────────────────────────────────────────────────────

#[test]
fn test_no_late_subscription() {
    let journal = Journal::default();
    let late = Script {
        late_subscription: Some("late"),
        ..Script::new()
    };
    let mut scheduler = scheduler(
        vec![("sneaky", late), ("herald", Script::new().emit("late"))],
        &journal,
    );

    let report = scheduler.tick().unwrap();

    assert_eq!(report.dropped, 1);
    assert!(entries(&journal, "sneaky<-").is_empty());
    assert!(scheduler.registry().event_subscribers("late").is_empty());
}

// ── Failure isolation ─────────────────────────────────────────────────

#[test]
fn test_panicking_plugin_does_not_stop_the_tick() {
    let journal = Journal::default();
    let broken = Script {
        panic_in_cycle: true,
        ..Script::new().emit("never")
    };
    let mut scheduler = scheduler(
        vec![
            ("before", Script::new().emit("early")),
            ("broken", broken),
            ("after", Script::new().emit("late").listen("early").listen("late")),
        ],
        &journal,
    );

    let report = scheduler.tick().unwrap();
    assert!(!report.success);
    assert_eq!(report.events, 2);
    assert_eq!(entries(&journal, "after<-"), ["after<-early", "after<-late"]);

    // the loop keeps going
    assert!(scheduler.tick().is_some());
}

#[test]
fn test_panicking_sole_subscriber_is_not_a_drop() {
    let journal = Journal::default();
    let choking = Script {
        panic_in_consume: true,
        ..Script::new().listen("tick").serve("predict")
    };
    let mut scheduler = scheduler(
        vec![
            ("source", Script::new().emit("tick").emit_service("predict")),
            ("choking", choking),
        ],
        &journal,
    );

    let report = scheduler.tick().unwrap();
    assert_eq!(report.deliveries, 2);
    assert_eq!(report.panics, 2);
    assert_eq!(report.dropped, 0);
    assert_eq!(entries(&journal, "choking<-"), ["choking<-tick", "choking<-svc:predict"]);

    let stats = scheduler.bus_stats();
    assert_eq!(stats.events_dropped, 0);
    assert_eq!(stats.service_events_dropped, 0);
    assert_eq!(scheduler.dispatch_event(Event::new("tick")), 1);
}

#[test]
fn test_failed_cycle_output_still_dispatched() {
    let journal = Journal::default();
    let failing = Script {
        fail_cycle: true,
        ..Script::new().emit("partial")
    };
    let mut scheduler = scheduler(
        vec![("flaky", failing), ("sink", Script::new().listen("partial"))],
        &journal,
    );

    let report = scheduler.tick().unwrap();
    assert!(!report.success);
    assert_eq!(entries(&journal, "sink<-partial").len(), 1);
}

// ── Payload ownership ─────────────────────────────────────────────────

struct Producer(Arc<AtomicUsize>);

impl Plugin for Producer {
    fn init(&mut self, _ctx: &mut PluginContext, _args: &[String]) -> PluginResult<()> {
        Ok(())
    }

    fn cycle(&mut self, _ctx: &mut PluginContext) -> CycleResult {
        CycleResult::ok()
            .with_event(Event::with_payload("heard", DropCounter(self.0.clone())))
            .with_event(Event::with_payload("unheard", DropCounter(self.0.clone())))
    }

    fn consume_event(&mut self, _ctx: &mut PluginContext, _event: &Event) {}
}

#[test]
fn test_payload_released_exactly_once_per_message() {
    let journal = Journal::default();
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();

    let mut loader: StaticLoader = loader(
        vec![
            ("ear1", Script::new().listen("heard")),
            ("ear2", Script::new().listen("heard")),
        ],
        &journal,
    );
    loader.register("producer", move || Box::new(Producer(counter.clone())));

    let mut registry = PluginRegistry::new(loader, Vec::new());
    for name in ["producer", "ear1", "ear2"] {
        registry.load_plugin(name, true).unwrap();
    }
    let mut scheduler = Scheduler::new(registry, Duration::ZERO);

    let report = scheduler.tick().unwrap();
    assert_eq!(report.deliveries, 2);
    assert_eq!(report.dropped, 1);
    assert_eq!(released.load(Ordering::SeqCst), 2);

    scheduler.tick().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 4);
}

// ── Lifecycle ─────────────────────────────────────────────────────────

#[test]
fn test_teardown_deinits_all_before_destroying_any() {
    let journal = Journal::default();
    let mut scheduler = scheduler(
        vec![
            ("a", Script::new()),
            ("b", Script::new()),
            ("c", Script::new()),
        ],
        &journal,
    );
    scheduler.tick().unwrap();
    journal.lock().unwrap().clear();

    scheduler.registry_mut().unload_all();

    assert_eq!(
        *journal.lock().unwrap(),
        [
            "a:deinit",
            "b:deinit",
            "c:deinit",
            "a:destroyed",
            "b:destroyed",
            "c:destroyed"
        ]
    );
}

#[test]
fn test_unload_unknown_plugin_leaves_registry_intact() {
    let journal = Journal::default();
    let mut scheduler = scheduler(
        vec![("kept", Script::new().listen("tick"))],
        &journal,
    );

    assert!(!scheduler.registry_mut().unload_plugin("never-loaded"));
    assert_eq!(scheduler.registry().plugin_names(), ["kept"]);
    assert_eq!(scheduler.registry().event_subscribers("tick").len(), 1);
    assert!(entries(&journal, "deinit").is_empty());
}

const HOST_CONFIG: &str = r#"
    [persistent-data-storage]
    base-data-directory = "/tmp/bs"

    [plugins]
    load = ["present", { name = "missing-module", required = false }]
    search-paths = ["/nonexistent"]

    [plugin-config.present]
    greeting = "hello"
"#;

#[test]
fn test_missing_optional_plugin_is_skipped() {
    let journal = Journal::default();
    let settings = Settings::parse(HOST_CONFIG).unwrap();

    let host = Beliefstate::from_settings(
        &settings,
        loader(vec![("present", Script::new())], &journal),
        Vec::new(),
    )
    .unwrap();

    assert!(host.registry().is_loaded("present"));
    assert!(!host.registry().is_loaded("missing-module"));
    assert_eq!(host.registry().len(), 1);
    host.deinit();
}

#[test]
fn test_missing_required_plugin_fails_initialization() {
    let journal = Journal::default();
    let settings = Settings::parse(&HOST_CONFIG.replace(
        r#"{ name = "missing-module", required = false }"#,
        r#""missing-module""#,
    ))
    .unwrap();

    let result = Beliefstate::from_settings(
        &settings,
        loader(vec![("present", Script::new())], &journal),
        Vec::new(),
    );

    assert!(matches!(result, Err(CoreError::RequiredPlugin { .. })));
}

#[test]
fn test_plugin_sees_its_config_and_args() {
    struct Inspector(Arc<std::sync::Mutex<Vec<String>>>);

    impl Plugin for Inspector {
        fn init(&mut self, ctx: &mut PluginContext, args: &[String]) -> PluginResult<()> {
            let mut seen = self.0.lock().unwrap();
            seen.push(ctx.config().string_value("greeting").unwrap_or_default());
            seen.extend(args.iter().cloned());
            seen.push(ctx.base_data_directory().display().to_string());
            Ok(())
        }

        fn consume_event(&mut self, _ctx: &mut PluginContext, _event: &Event) {}
    }

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let shared = seen.clone();
    let loader = StaticLoader::new().with("present", move || Box::new(Inspector(shared.clone())));
    let settings = Settings::parse(&HOST_CONFIG.replace(
        r#", { name = "missing-module", required = false }"#,
        "",
    ))
    .unwrap();

    let host = Beliefstate::from_settings(
        &settings,
        loader,
        vec!["beliefstate".into(), "--robot".into()],
    )
    .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        ["hello", "beliefstate", "--robot", "/tmp/bs"]
    );
    host.deinit();
}
