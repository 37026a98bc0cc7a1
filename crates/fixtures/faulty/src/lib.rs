//! Test module: its constructor panics, as when required hardware is absent.

use std::path::Path;

use beliefstate_plugin::{export_plugin, Event, Plugin, PluginContext, PluginResult};

struct Sensor;

impl Sensor {
    fn connect() -> Self {
        let device = Path::new("/dev/null/bs-sensor");
        assert!(device.exists(), "sensor device {} not present", device.display());
        Sensor
    }
}

impl Plugin for Sensor {
    fn init(&mut self, _ctx: &mut PluginContext, _args: &[String]) -> PluginResult<()> {
        Ok(())
    }

    fn consume_event(&mut self, _ctx: &mut PluginContext, _event: &Event) {}
}

export_plugin!(Sensor::connect());
