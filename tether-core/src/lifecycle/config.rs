//! Runtime Configuration
//!
//! Configuration is per thread (the runtime is single-threaded) and is plain
//! data so it can be loaded from JSON alongside the rest of an application's
//! settings.

use serde::{Deserialize, Serialize};

/// What `Runtime::tick` does with nodes that were never attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachCheck {
    /// Skip the check entirely; `tick` returns no errors.
    Off,
    /// Log each offender at error level and return it.
    #[default]
    Log,
    /// Log, then panic with the first offender.
    Panic,
}

/// Runtime settings for the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Policy for the never-attached hygiene check.
    pub attach_check: AttachCheck,

    /// Catch panics raised by listeners, pipeline steps and destroy hooks.
    ///
    /// Turning this off lets a panicking callback unwind through the
    /// runtime, which is occasionally useful under a debugger.
    pub isolate_panics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            attach_check: AttachCheck::Log,
            isolate_panics: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}
