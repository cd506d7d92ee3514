//! tfacc Provider Lifecycle
//!
//! Serves providers from the test process and lets Terraform reattach to
//! them through a handshake published in the command's environment.

pub mod config;
pub mod env;
pub mod error;
pub mod handshake;
pub mod lifecycle;
pub mod listener;
pub mod server;

pub use config::{LifecycleConfig, Transport};
pub use env::{EnvBindings, ScopedEnv};
pub use error::{ProviderError, Result};
pub use handshake::{Handshake, ProtocolVersion, ProviderAddress};
pub use lifecycle::{LifecycleManager, Phase};
pub use listener::{Endpoint, PluginListener};
pub use server::{GrpcPluginServer, InProcessProvider, PluginServer, ProviderFactory};
