use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use russh::{
    ChannelStream, Disconnect,
    client::{self, Handle, Msg},
    keys::{PrivateKeyWithHashAlg, agent::client::AgentClient, ssh_key::PublicKey},
};
use thiserror::Error;
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use crate::tunneling::{auth::Credentials, handler::ClientHandler};

use super::tunnel_config::TunnelConfig;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("ssh session error")]
    Ssh(#[from] russh::Error),
    #[error("timed out after {timeout:?} dialing ssh host {address}")]
    Timeout { address: String, timeout: Duration },
    #[error("ssh host {address} rejected {method} authentication for {user}")]
    Rejected {
        address: String,
        user: String,
        method: &'static str,
    },
    #[error("ssh agent failed to sign: {0}")]
    AgentSign(String),
    #[error("fail to open channel to {target} through the tunnel")]
    Channel {
        target: String,
        #[source]
        source: russh::Error,
    },
}

/// An authenticated ssh session to the jump host. Every `open_channel` call
/// multiplexes a new `direct-tcpip` channel over it.
pub(crate) struct Tunnel {
    address: String,
    handle: Handle<ClientHandler>,
    closed: AtomicBool,
}

impl Tunnel {
    pub async fn open(config: &TunnelConfig, credentials: Credentials) -> Result<Tunnel, TunnelError> {
        Tunnel::open_with_timeout(config, credentials, CONNECT_TIMEOUT).await
    }

    pub(super) async fn open_with_timeout(
        config: &TunnelConfig,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Tunnel, TunnelError> {
        let address = config.address();
        info!("dialing SSH server {}@{} ...", config.username, address);
        let client_config = Arc::new(client::Config::default());
        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(
                client_config,
                (config.host.to_owned(), config.port),
                ClientHandler::new(&config.host, config.port),
            ),
        )
        .await
        .map_err(|_| TunnelError::Timeout {
            address: address.clone(),
            timeout,
        })??;

        let method = credentials.method_name();
        let authenticated = match credentials {
            Credentials::Password(password) => handle
                .authenticate_password(config.username.clone(), password)
                .await?
                .success(),
            Credentials::PrivateKey(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(
                        config.username.clone(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await?
                    .success()
            }
            Credentials::Agent {
                mut client,
                identities,
            } => authenticate_with_agent(&mut handle, &config.username, &mut client, identities)
                .await?,
        };
        if !authenticated {
            // the handshake is done, so don't leave the session dangling
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(TunnelError::Rejected {
                address,
                user: config.username.clone(),
                method,
            });
        }
        info!("ssh tunnel to {} is up", address);
        Ok(Tunnel {
            address,
            handle,
            closed: AtomicBool::new(false),
        })
    }

    pub async fn open_channel(&self, host: &str, port: u16) -> Result<ChannelStream<Msg>, TunnelError> {
        debug!("opening channel to {}:{} via {}", host, port, self.address);
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|source| TunnelError::Channel {
                target: format!("{host}:{port}"),
                source,
            })?;
        Ok(channel.into_stream())
    }

    /// Disconnects the session. Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing ssh tunnel to {}", self.address);
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!("error while closing ssh tunnel to {}: {}", self.address, e);
        }
    }
}

/// Offers the agent's identities one after the other until the host accepts one.
async fn authenticate_with_agent(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    agent: &mut AgentClient<UnixStream>,
    identities: Vec<PublicKey>,
) -> Result<bool, TunnelError> {
    let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
    for key in identities {
        debug!("trying agent identity {}", key.fingerprint(Default::default()));
        let result = handle
            .authenticate_publickey_with(user, key, hash_alg, agent)
            .await
            .map_err(|e| TunnelError::AgentSign(e.to_string()))?;
        if result.success() {
            return Ok(true);
        }
    }
    Ok(false)
}
