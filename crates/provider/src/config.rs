//! Lifecycle configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Listener family used for in-process provider endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Unix,
}

impl Default for Transport {
    fn default() -> Self {
        if cfg!(unix) {
            Transport::Unix
        } else {
            Transport::Tcp
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Unix => write!(f, "unix"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            "unix" => Ok(Transport::Unix),
            other => Err(format!("unknown transport {:?}", other)),
        }
    }
}

/// Provider lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Serve providers in-process and hand Terraform a reattach handshake.
    /// When off, Terraform launches provider binaries itself.
    pub reattach: bool,

    /// Listener family
    pub transport: Transport,

    /// Variable carrying the reattach handshake to the command
    pub handshake_env: String,

    /// Variable asking the command to stop providers gracefully instead of
    /// killing this process
    pub soft_stop_env: String,

    /// How long a server may take to stop on its own after a successful
    /// command before it is cancelled
    pub drain_grace_ms: u64,

    /// Also export the bindings into this process's environment for the
    /// duration of each invocation
    pub export_process_env: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reattach: true,
            transport: Transport::default(),
            handshake_env: "TF_REATTACH_PROVIDERS".to_string(),
            soft_stop_env: "TF_PLUGIN_SOFT_STOP".to_string(),
            drain_grace_ms: 0,
            export_process_env: false,
        }
    }
}

impl LifecycleConfig {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}
