//! Provider lifecycle manager
//!
//! Wraps one external command invocation so that Terraform reattaches to
//! providers served from this process:
//!
//! ```text
//! Idle -> ListenerBound -> HandshakePublished -> ServerRunning -> Draining -> Closed
//! ```
//!
//! The command runs on a spawned orchestration task; provider servers run on
//! the calling task. The orchestration task reports completion over a
//! oneshot channel, after which the bindings are cleared and the servers are
//! stopped.

use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LifecycleConfig;
use crate::env::{EnvBindings, ScopedEnv};
use crate::error::ProviderError;
use crate::handshake::{Handshake, ProviderAddress};
use crate::listener::Endpoint;
use crate::server::InProcessProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ListenerBound,
    HandshakePublished,
    ServerRunning,
    Draining,
    Closed,
}

pub struct LifecycleManager {
    config: LifecycleConfig,
    /// Namespace half of every provider address, e.g. `registry.terraform.io/hashicorp`
    namespace: String,
    /// One invocation at a time: the bindings are process-wide
    serial: tokio::sync::Mutex<()>,
    phase: Mutex<Phase>,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig, namespace: impl Into<String>) -> Self {
        Self {
            config,
            namespace: namespace.into(),
            serial: tokio::sync::Mutex::new(()),
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Bindings for a command that must not reattach to anything
    pub fn cleared_bindings(&self) -> EnvBindings {
        let mut bindings = EnvBindings::new();
        bindings.remove(&self.config.handshake_env);
        bindings.remove(&self.config.soft_stop_env);
        bindings
    }

    fn transition(&self, phase: Phase) {
        let mut current = self.phase.lock();
        debug!("Provider lifecycle {:?} -> {:?}", *current, phase);
        *current = phase;
    }

    /// Run `command` with reattach bindings for `providers`
    ///
    /// When reattach is disabled, or nothing is served in-process, the
    /// command runs directly with cleared bindings.
    pub async fn run<T, E, F, Fut>(&self, providers: &[InProcessProvider], command: F) -> Result<T, E>
    where
        F: FnOnce(EnvBindings) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ProviderError> + Send + 'static,
    {
        if !self.config.reattach || providers.is_empty() {
            debug!("Running command without in-process providers");
            return command(self.cleared_bindings()).await;
        }

        let _serial = self.serial.lock().await;
        self.transition(Phase::Idle);

        let mut handshakes = Vec::with_capacity(providers.len());
        let mut servers = Vec::with_capacity(providers.len());
        let mut guards = Vec::with_capacity(providers.len());

        for provider in providers {
            let server = (provider.factory)().map_err(|e| ProviderError::Factory {
                name: provider.name.clone(),
                reason: e.to_string(),
            })?;
            let endpoint = Endpoint::bind(self.config.transport).await?;

            handshakes.push(Handshake::new(
                ProviderAddress::new(&self.namespace, &provider.name),
                provider.protocol,
                self.config.transport,
                &endpoint.address,
            ));

            let (listener, guard) = endpoint.into_parts();
            servers.push((provider.name.clone(), server, listener));
            guards.push(guard);
        }
        self.transition(Phase::ListenerBound);

        let mut bindings = EnvBindings::new();
        bindings.set(&self.config.handshake_env, Handshake::join(&handshakes));
        bindings.set(&self.config.soft_stop_env, "1");
        let exported = self
            .config
            .export_process_env
            .then(|| ScopedEnv::export(&bindings));
        self.transition(Phase::HandshakePublished);

        let shutdown = CancellationToken::new();
        let (done_tx, mut done_rx) = oneshot::channel::<bool>();

        let orchestration = command(bindings);
        let task = tokio::spawn(async move {
            let result = orchestration.await;
            let _ = done_tx.send(result.is_ok());
            result
        });

        let serve_all = join_all(servers.into_iter().map(|(name, server, listener)| {
            let token = shutdown.clone();
            async move {
                let result = server.serve(listener, token).await;
                (name, result)
            }
        }));
        tokio::pin!(serve_all);
        self.transition(Phase::ServerRunning);
        info!("Serving {} provider(s) in-process", handshakes.len());

        let mut stopped = None;
        let succeeded = tokio::select! {
            done = &mut done_rx => done.unwrap_or(false),
            results = &mut serve_all => {
                debug!("Provider servers stopped before the command finished");
                stopped = Some(results);
                (&mut done_rx).await.unwrap_or(false)
            }
        };

        // The handshake must not outlive the command it was made for
        drop(exported);
        self.transition(Phase::Draining);

        if !succeeded {
            debug!("Command failed, shutting provider servers down");
            shutdown.cancel();
        }

        let results = match stopped {
            Some(results) => results,
            None => match tokio::time::timeout(self.config.drain_grace(), &mut serve_all).await {
                Ok(results) => results,
                Err(_) => {
                    debug!("Provider servers still running, cancelling");
                    shutdown.cancel();
                    serve_all.await
                }
            },
        };

        drop(guards);
        self.transition(Phase::Closed);

        let outcome = task.await.map_err(|e| E::from(ProviderError::from(e)))?;

        let mut server_failure = None;
        for (name, result) in results {
            if let Err(e) = result {
                error!("Provider server {} failed: {}", name, e);
                server_failure.get_or_insert(ProviderError::Server {
                    name,
                    reason: e.to_string(),
                });
            }
        }

        match (outcome, server_failure) {
            (Ok(_), Some(failure)) => {
                warn!("Command succeeded but a provider server failed");
                Err(E::from(failure))
            }
            (outcome, _) => outcome,
        }
    }
}
