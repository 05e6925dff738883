//! Example Tether plugin.
//!
//! Answers the `echo` and `ping` commands and, once initialized, registers
//! an `echo` message handler that returns the sender and payload it got.
use std::sync::atomic::{AtomicU64, Ordering};

use log::info;
use serde_json::{Value, json};
use tether_core::plugin_system::{CommandParams, Plugin, PluginContext, PluginError, PluginResult};

pub const PLUGIN_ID: &str = "echo-plugin";

/// Message type served on the bus
pub const ECHO_MESSAGE: &str = "echo";

#[derive(Debug, Default)]
pub struct EchoPlugin {
    commands_served: AtomicU64,
}

impl EchoPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands_served(&self) -> u64 {
        self.commands_served.load(Ordering::Relaxed)
    }
}

impl Plugin for EchoPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    fn name(&self) -> &str {
        "Echo"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn vendor(&self) -> &str {
        "Tether Developers"
    }

    fn description(&self) -> &str {
        "Echoes commands and messages back to the caller"
    }

    fn initialize(&self, context: &PluginContext) -> PluginResult<()> {
        context.register_handler(ECHO_MESSAGE, |sender, payload| {
            json!({ "from": sender, "payload": payload })
        })?;
        info!("Echo plugin initialized");
        Ok(())
    }

    fn activate(&self) -> PluginResult<()> {
        info!("Echo plugin active");
        Ok(())
    }

    fn shutdown(&self) -> PluginResult<()> {
        info!("Echo plugin served {} command(s)", self.commands_served());
        Ok(())
    }

    fn execute_command(&self, command: &str, params: &CommandParams) -> PluginResult<Value> {
        let result = match command {
            "echo" => Value::Object(params.clone()),
            "ping" => json!("pong"),
            other => return Err(PluginError::UnknownCommand(other.to_string())),
        };
        self.commands_served.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }
}

tether_core::declare_plugin!(EchoPlugin, EchoPlugin::new);
