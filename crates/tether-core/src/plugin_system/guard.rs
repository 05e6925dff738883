//! Failure containment around calls into plugin code.
//!
//! Every engine-to-plugin call runs through [`guarded`], which turns an
//! `Err` or a panic into a [`CallFailure`]. Nothing raised by a plugin
//! escapes past this point.
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::plugin_system::traits::{PluginError, PluginResult};

/// Plugin callbacks the engine invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOperation {
    Initialize,
    Activate,
    Deactivate,
    Shutdown,
    ExecuteCommand,
}

impl LifecycleOperation {
    /// Verb form, as in "Failed to initialize".
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Shutdown => "shut down",
            Self::ExecuteCommand => "execute command",
        }
    }

    /// Noun form, as in "Error during initialization".
    pub fn noun(&self) -> &'static str {
        match self {
            Self::Initialize => "initialization",
            Self::Activate => "activation",
            Self::Deactivate => "deactivation",
            Self::Shutdown => "shutdown",
            Self::ExecuteCommand => "command execution",
        }
    }
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// How a guarded plugin call went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The plugin declined the operation (`PluginError::Rejected`).
    Rejected,
    /// The plugin returned any other error.
    Error(String),
    /// The plugin panicked.
    Panic(String),
}

impl CallFailure {
    /// Human-readable cause used in failure events and errors.
    pub fn describe(&self, operation: LifecycleOperation) -> String {
        match self {
            Self::Rejected => format!("Failed to {}", operation.verb()),
            Self::Error(msg) => format!("Error during {}: {}", operation.noun(), msg),
            Self::Panic(msg) => format!("Panic during {}: {}", operation.noun(), msg),
        }
    }
}

/// Extracts the message carried by a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic reason".to_string()
    }
}

/// Runs `call`, containing both returned errors and panics.
pub fn guarded<T>(call: impl FnOnce() -> PluginResult<T>) -> Result<T, CallFailure> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(PluginError::Rejected)) => Err(CallFailure::Rejected),
        Ok(Err(e)) => Err(CallFailure::Error(e.to_string())),
        Err(payload) => Err(CallFailure::Panic(panic_message(payload.as_ref()))),
    }
}
