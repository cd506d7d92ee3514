//! Provider server seam
//!
//! The wire protocol is not this crate's business: a [`PluginServer`] is
//! anything that serves on a listener until told to stop.

use std::sync::Arc;
use tokio_stream::wrappers::TcpListenerStream;
#[cfg(unix)]
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tracing::info;

use crate::handshake::ProtocolVersion;
use crate::listener::PluginListener;

/// Serves one provider on a bound listener
#[async_trait::async_trait]
pub trait PluginServer: Send + Sync {
    /// Serve until `shutdown` is cancelled or the command asks the server to
    /// stop, then return
    async fn serve(&self, listener: PluginListener, shutdown: CancellationToken)
        -> anyhow::Result<()>;
}

/// Builds a fresh server for every command invocation
pub type ProviderFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn PluginServer>> + Send + Sync>;

/// A provider served from this process
#[derive(Clone)]
pub struct InProcessProvider {
    /// Provider type name, e.g. `aws`
    pub name: String,
    pub protocol: ProtocolVersion,
    pub factory: ProviderFactory,
}

impl InProcessProvider {
    pub fn new(name: impl Into<String>, protocol: ProtocolVersion, factory: ProviderFactory) -> Self {
        Self {
            name: name.into(),
            protocol,
            factory,
        }
    }
}

impl std::fmt::Debug for InProcessProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessProvider")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Serves a tonic router, e.g. one carrying a `tfplugin6.Provider` service
pub struct GrpcPluginServer<F> {
    router: F,
}

impl<F> GrpcPluginServer<F>
where
    F: Fn() -> Router + Send + Sync + 'static,
{
    pub fn new(router: F) -> Self {
        Self { router }
    }

    /// Wrap as a factory handing out the same server for every invocation
    pub fn into_factory(self) -> ProviderFactory {
        let server: Arc<dyn PluginServer> = Arc::new(self);
        Arc::new(move || Ok(server.clone()))
    }
}

#[async_trait::async_trait]
impl<F> PluginServer for GrpcPluginServer<F>
where
    F: Fn() -> Router + Send + Sync + 'static,
{
    async fn serve(
        &self,
        listener: PluginListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let router = (self.router)();
        info!("Serving gRPC provider on {} listener", listener.transport());

        match listener {
            PluginListener::Tcp(listener) => {
                router
                    .serve_with_incoming_shutdown(
                        TcpListenerStream::new(listener),
                        shutdown.cancelled(),
                    )
                    .await?
            }
            #[cfg(unix)]
            PluginListener::Unix(listener) => {
                router
                    .serve_with_incoming_shutdown(
                        UnixListenerStream::new(listener),
                        shutdown.cancelled(),
                    )
                    .await?
            }
        }

        Ok(())
    }
}
