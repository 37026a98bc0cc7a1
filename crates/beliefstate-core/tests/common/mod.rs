// Shared scripted plugins for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use beliefstate_core::plugin::{
    CycleResult, Event, Plugin, PluginContext, PluginResult, ServiceEvent,
};
use beliefstate_core::StaticLoader;

/// Append-only record of everything the scripted plugins did.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// What a [`Scripted`] plugin subscribes to and does each call.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub events: Vec<&'static str>,
    pub services: Vec<&'static str>,
    /// Events returned from every cycle.
    pub emit: Vec<&'static str>,
    /// Service events returned from every cycle.
    pub emit_services: Vec<&'static str>,
    /// On consuming the first event, deploy the second.
    pub replies: Vec<(&'static str, &'static str)>,
    /// Subscription attempted from inside `cycle`.
    pub late_subscription: Option<&'static str>,
    pub fail_cycle: bool,
    pub panic_in_cycle: bool,
    /// Panic after journaling each consumed event or service event.
    pub panic_in_consume: bool,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(mut self, event: &'static str) -> Self {
        self.events.push(event);
        self
    }

    pub fn serve(mut self, service: &'static str) -> Self {
        self.services.push(service);
        self
    }

    pub fn emit(mut self, event: &'static str) -> Self {
        self.emit.push(event);
        self
    }

    pub fn emit_service(mut self, service: &'static str) -> Self {
        self.emit_services.push(service);
        self
    }

    pub fn reply(mut self, on: &'static str, with: &'static str) -> Self {
        self.replies.push((on, with));
        self
    }
}

pub struct Scripted {
    name: &'static str,
    script: Script,
    journal: Journal,
}

impl Scripted {
    fn note(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

impl Plugin for Scripted {
    fn init(&mut self, ctx: &mut PluginContext, _args: &[String]) -> PluginResult<()> {
        for event in &self.script.events {
            ctx.subscribe_event(*event);
        }
        for service in &self.script.services {
            ctx.subscribe_service(*service);
        }
        self.note(format!("{}:init", self.name));
        Ok(())
    }

    fn deinit(&mut self, _ctx: &mut PluginContext) -> PluginResult<()> {
        self.note(format!("{}:deinit", self.name));
        Ok(())
    }

    fn cycle(&mut self, ctx: &mut PluginContext) -> CycleResult {
        if let Some(late) = self.script.late_subscription {
            ctx.subscribe_event(late);
        }
        if self.script.panic_in_cycle {
            panic!("{} blew up", self.name);
        }

        let mut result = if self.script.fail_cycle {
            CycleResult::failed()
        } else {
            CycleResult::ok()
        };
        for event in &self.script.emit {
            result.push_event(Event::new(*event));
        }
        for service in &self.script.emit_services {
            result.push_service_event(ServiceEvent::new(*service));
        }
        result
    }

    fn consume_event(&mut self, ctx: &mut PluginContext, event: &Event) {
        self.note(format!("{}<-{}", self.name, event.name));
        for (on, with) in &self.script.replies {
            if *on == event.name {
                ctx.deploy_event(Event::new(*with));
            }
        }
        if self.script.panic_in_consume {
            panic!("{} choked on {}", self.name, event.name);
        }
    }

    fn consume_service_event(&mut self, _ctx: &mut PluginContext, event: &ServiceEvent) {
        self.note(format!("{}<-svc:{}", self.name, event.service_name));
        if self.script.panic_in_consume {
            panic!("{} choked on {}", self.name, event.service_name);
        }
    }
}

impl Drop for Scripted {
    fn drop(&mut self) {
        self.note(format!("{}:destroyed", self.name));
    }
}

/// Serve every `(name, script)` pair as an in-process plugin.
pub fn loader(scripts: Vec<(&'static str, Script)>, journal: &Journal) -> StaticLoader {
    let mut loader = StaticLoader::new();
    for (name, script) in scripts {
        let journal = journal.clone();
        loader.register(name, move || {
            Box::new(Scripted {
                name,
                script: script.clone(),
                journal: journal.clone(),
            })
        });
    }
    loader
}

/// Journal entries containing `needle`, in order.
pub fn entries(journal: &Journal, needle: &str) -> Vec<String> {
    journal
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.contains(needle))
        .cloned()
        .collect()
}

/// Payload counting how many times it was released.
#[derive(Debug)]
pub struct DropCounter(pub Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
