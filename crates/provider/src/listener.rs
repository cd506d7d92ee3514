//! Local listeners for in-process provider servers

use tempfile::TempDir;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::debug;

use crate::config::Transport;
use crate::error::{ProviderError, Result};

const SOCKET_NAME: &str = "plugin.sock";

/// A bound listener, handed to a provider server
#[derive(Debug)]
pub enum PluginListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl PluginListener {
    pub fn transport(&self) -> Transport {
        match self {
            PluginListener::Tcp(_) => Transport::Tcp,
            #[cfg(unix)]
            PluginListener::Unix(_) => Transport::Unix,
        }
    }
}

/// A listener plus whatever must be cleaned up once it closes
#[derive(Debug)]
pub struct Endpoint {
    pub listener: PluginListener,
    pub address: String,
    guard: EndpointGuard,
}

/// Keeps the socket directory alive; dropping it removes the socket file
#[derive(Debug)]
pub struct EndpointGuard {
    socket_dir: Option<TempDir>,
}

impl EndpointGuard {
    pub fn socket_dir(&self) -> Option<&std::path::Path> {
        self.socket_dir.as_ref().map(|d| d.path())
    }
}

impl Endpoint {
    /// Bind a fresh listener: a free loopback port, or a uniquely named
    /// socket in a new temp directory
    pub async fn bind(transport: Transport) -> Result<Self> {
        let endpoint = match transport {
            Transport::Tcp => {
                let listener = TcpListener::bind("127.0.0.1:0")
                    .await
                    .map_err(|source| ProviderError::Bind { transport, source })?;
                let address = listener.local_addr()?.to_string();
                Endpoint {
                    listener: PluginListener::Tcp(listener),
                    address,
                    guard: EndpointGuard { socket_dir: None },
                }
            }
            #[cfg(unix)]
            Transport::Unix => {
                let dir = tempfile::Builder::new()
                    .prefix("plugin")
                    .tempdir()
                    .map_err(|source| ProviderError::Bind { transport, source })?;
                let path = dir.path().join(SOCKET_NAME);
                let listener = UnixListener::bind(&path)
                    .map_err(|source| ProviderError::Bind { transport, source })?;
                Endpoint {
                    listener: PluginListener::Unix(listener),
                    address: path.to_string_lossy().into_owned(),
                    guard: EndpointGuard {
                        socket_dir: Some(dir),
                    },
                }
            }
            #[cfg(not(unix))]
            Transport::Unix => return Err(ProviderError::UnsupportedTransport(transport)),
        };

        debug!("Bound {} listener at {}", transport, endpoint.address);
        Ok(endpoint)
    }

    pub fn into_parts(self) -> (PluginListener, EndpointGuard) {
        (self.listener, self.guard)
    }
}
