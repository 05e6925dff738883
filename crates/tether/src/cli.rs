//! Command implementations for the `tether` binary.
use std::path::Path;
use std::process::ExitCode;

use log::{debug, info};
use serde_json::Value;
use tether_core::kernel::constants::{APP_NAME, FRAMEWORK_VERSION};
use tether_core::kernel::HostConfig;
use tether_core::kernel::error::Result;
use tether_core::plugin_system::CommandParams;
use tether_core::{Host, PluginDescriptor};

/// Reads `path` if present; a missing file means defaults.
pub fn load_config(path: &Path) -> Result<HostConfig> {
    let config = HostConfig::load_or_default(path)?;
    debug!("Using configuration: {:?}", config);
    Ok(config)
}

/// Parses `key=value`. The value is JSON if it parses as JSON, a string otherwise.
pub fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn status(config: &HostConfig) -> Result<ExitCode> {
    println!("{} (framework {}, built for {})", APP_NAME, config.framework_version, FRAMEWORK_VERSION);
    println!("Plugin directory:   {}", config.plugin_dir.display());
    println!("Metadata directory: {}", config.metadata_dir.display());
    println!("Run `tether --help` for commands.");
    Ok(ExitCode::SUCCESS)
}

pub fn scan(config: HostConfig) -> Result<ExitCode> {
    let metadata_dir = config.metadata_dir.clone();
    let host = Host::with_library_loader(config);
    // Discovery only: no grants or autostart.
    host.engine().initialize()?;
    let ids = host.engine().scan_for_plugins()?;
    if ids.is_empty() {
        println!("No plugins found in {}", metadata_dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    for id in ids {
        if let Some(d) = host.engine().descriptor(&id) {
            print!("{} {} ({}) by {}", d.id(), d.version(), d.name(), d.vendor());
            if !d.dependencies().is_empty() {
                print!(" requires {}", d.dependencies().join(", "));
            }
            if !d.is_compatible_with(&host.config().framework_version) {
                print!(" [incompatible: needs framework {}]", d.min_framework_version());
            }
            println!();
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn check(config: &HostConfig, path: &Path) -> Result<ExitCode> {
    let descriptor = match PluginDescriptor::from_file(path) {
        Ok(d) => d,
        Err(e) => {
            println!("Invalid descriptor {}: {}", path.display(), e);
            return Ok(ExitCode::FAILURE);
        }
    };
    let running = config.framework_version;
    if descriptor.is_compatible_with(&running) {
        println!(
            "{} {} is compatible with framework {}",
            descriptor.id(),
            descriptor.version(),
            running
        );
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{} {} requires framework {} but {} is running",
            descriptor.id(),
            descriptor.version(),
            descriptor.min_framework_version(),
            running
        );
        Ok(ExitCode::FAILURE)
    }
}

pub fn order(config: HostConfig, ids: &[String]) -> Result<ExitCode> {
    let host = Host::with_library_loader(config);
    host.engine().initialize()?;
    let available = host.engine().scan_for_plugins()?;
    let roots: Vec<&str> = if ids.is_empty() {
        available.iter().map(String::as_str).collect()
    } else {
        ids.iter().map(String::as_str).collect()
    };
    for id in host.engine().dependency_order(&roots)? {
        println!("{}", id);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn activate(config: HostConfig, ids: &[String]) -> Result<ExitCode> {
    let mut host = Host::with_library_loader(config);
    host.start()?;

    let mut code = ExitCode::SUCCESS;
    for id in ids {
        if let Err(e) = host.engine().activate(id) {
            println!("{}: activation failed: {}", id, e);
            code = ExitCode::FAILURE;
        }
    }
    for id in host.engine().loaded_plugins() {
        println!("{}: {}", id, host.engine().state(&id));
    }

    host.stop()?;
    Ok(code)
}

pub fn run(config: HostConfig, id: &str, command: &str, params: Vec<(String, Value)>) -> Result<ExitCode> {
    let mut host = Host::with_library_loader(config);
    host.start()?;
    host.engine().activate(id)?;

    let params: CommandParams = params.into_iter().collect();
    info!("Running {} on {} with {} parameter(s)", command, id, params.len());
    let code = match host.engine().execute_command(id, command, &params) {
        Some(result) => {
            let text = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
            println!("{}", text);
            ExitCode::SUCCESS
        }
        None => {
            println!("Command '{}' on {} produced no result", command, id);
            ExitCode::FAILURE
        }
    };

    host.stop()?;
    Ok(code)
}
