//! Test module: answers every `ping` with a `pong`.

use beliefstate_plugin::{export_plugin, Event, Plugin, PluginContext, PluginResult};

#[derive(Default)]
struct Echo {
    pings: u64,
}

impl Plugin for Echo {
    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn init(&mut self, ctx: &mut PluginContext, _args: &[String]) -> PluginResult<()> {
        ctx.subscribe_event("ping");
        Ok(())
    }

    fn consume_event(&mut self, ctx: &mut PluginContext, _event: &Event) {
        self.pings += 1;
        ctx.deploy_event(Event::new(format!("pong-{}", self.pings)));
    }
}

export_plugin!(Echo::default());
