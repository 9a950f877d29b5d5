use std::{fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::{
    database::DbConfig,
    tunneling::{
        auth::{AuthError, AuthResolver},
        tunnel::{Tunnel, TunnelError},
        tunnel_config::TunnelConfig,
    },
};

pub(crate) mod relay;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error("fail to dial {address}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// How bytes reach the database server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportKind {
    Direct,
    Tunneled,
}

impl TransportKind {
    /// network tag used in the connection string
    pub fn tag(&self) -> &'static str {
        match self {
            TransportKind::Direct => "tcp",
            TransportKind::Tunneled => "ssh+tcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

pub(crate) trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

pub(crate) type DialStream = Box<dyn ByteStream>;

/// Database endpoint as seen from wherever the dialer connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: &str, port: u16) -> Self {
        Target {
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens a fresh byte stream to the database server on every call.
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<DialStream, TransportError>;
    fn target(&self) -> Target;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn dialer(&self) -> Arc<dyn Dialer>;
    /// Releases whatever the transport holds open. Safe to call twice.
    async fn close(&self);
}

#[async_trait]
pub(crate) trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        database: &DbConfig,
        tunnel: &TunnelConfig,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

pub(crate) struct TcpDialer {
    target: Target,
}

impl TcpDialer {
    pub fn new(host: &str, port: u16) -> Self {
        TcpDialer {
            target: Target::new(host, port),
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> Result<DialStream, TransportError> {
        let stream = TcpStream::connect((self.target.host.as_str(), self.target.port))
            .await
            .map_err(|source| TransportError::Dial {
                address: self.target.to_string(),
                source,
            })?;
        Ok(Box::new(stream))
    }
    fn target(&self) -> Target {
        self.target.clone()
    }
}

/// Each dial is a new channel over the shared tunnel session.
pub(crate) struct TunnelDialer {
    tunnel: Arc<Tunnel>,
    host: String,
    port: u16,
}

#[async_trait]
impl Dialer for TunnelDialer {
    async fn dial(&self) -> Result<DialStream, TransportError> {
        let stream = self.tunnel.open_channel(&self.host, self.port).await?;
        Ok(Box::new(stream))
    }
    fn target(&self) -> Target {
        Target::new(&self.host, self.port)
    }
}

/// The driver opens its own socket to `dialer().target()`, so `dial()` on
/// this transport is only used by callers that want a raw stream.
pub(crate) struct DirectTransport {
    dialer: Arc<TcpDialer>,
}

#[async_trait]
impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }
    fn dialer(&self) -> Arc<dyn Dialer> {
        self.dialer.clone()
    }
    async fn close(&self) {}
}

pub(crate) struct TunneledTransport {
    tunnel: Arc<Tunnel>,
    dialer: Arc<TunnelDialer>,
}

#[async_trait]
impl Transport for TunneledTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tunneled
    }
    fn dialer(&self) -> Arc<dyn Dialer> {
        self.dialer.clone()
    }
    async fn close(&self) {
        self.tunnel.close().await;
    }
}

pub(crate) struct SshTransportFactory {
    resolver: AuthResolver,
}

impl SshTransportFactory {
    pub fn new(resolver: AuthResolver) -> Self {
        SshTransportFactory { resolver }
    }
}

#[async_trait]
impl TransportFactory for SshTransportFactory {
    async fn open(
        &self,
        database: &DbConfig,
        tunnel: &TunnelConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        if !tunnel.enabled {
            debug!("tunnel disabled, dialing {} directly", database.address());
            return Ok(Box::new(DirectTransport {
                dialer: Arc::new(TcpDialer::new(&database.host, database.port)),
            }));
        }
        let credentials = self.resolver.resolve(tunnel).await?;
        let session = Arc::new(Tunnel::open(tunnel, credentials).await?);
        info!("reaching {} through {}", database.address(), tunnel.address());
        Ok(Box::new(TunneledTransport {
            dialer: Arc::new(TunnelDialer {
                tunnel: session.clone(),
                host: database.host.clone(),
                port: database.port,
            }),
            tunnel: session,
        }))
    }
}
