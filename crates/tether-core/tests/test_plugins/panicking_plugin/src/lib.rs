use tether_core::plugin_system::{Plugin, PluginContext, PluginResult};

pub struct PanickingPlugin;

impl PanickingPlugin {
    fn new() -> Self {
        panic!("panicking-plugin refuses to be constructed")
    }
}

impl Plugin for PanickingPlugin {
    fn id(&self) -> &str {
        "panicking-plugin"
    }

    fn name(&self) -> &str {
        "Panicking"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn vendor(&self) -> &str {
        "Tether Tests"
    }

    fn initialize(&self, _context: &PluginContext) -> PluginResult<()> {
        Ok(())
    }
}

tether_core::declare_plugin!(PanickingPlugin, PanickingPlugin::new);
