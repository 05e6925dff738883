use serde_json::{Value, json};
use tether_core::plugin_system::{CommandParams, Plugin, PluginContext, PluginError, PluginResult};

pub struct GoodPlugin;

impl Plugin for GoodPlugin {
    fn id(&self) -> &str {
        "good-plugin"
    }

    fn name(&self) -> &str {
        "Good"
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

    fn execute_command(&self, command: &str, _params: &CommandParams) -> PluginResult<Value> {
        match command {
            "ping" => Ok(json!("pong")),
            other => Err(PluginError::UnknownCommand(other.to_string())),
        }
    }
}

fn create() -> GoodPlugin {
    GoodPlugin
}

tether_core::declare_plugin!(GoodPlugin, create);
