use std::path::PathBuf;

use russh::keys::{PrivateKey, agent::client::AgentClient, load_secret_key, ssh_key::PublicKey};
use thiserror::Error;
use tokio::net::UnixStream;
use tracing::debug;

use crate::config::expand_home;

use super::tunnel_config::{TunnelConfig, non_empty};

pub(crate) const AGENT_SOCKET_ENV: &str = "SSH_AUTH_SOCK";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("cannot authenticate to the ssh host: {0}")]
    Config(String),
    #[error("fail to load ssh private key {path}")]
    KeyLoad {
        path: String,
        #[source]
        source: russh::keys::Error,
    },
    #[error("fail to access ssh agent: {0}")]
    AgentUnavailable(String),
}

/// The single authentication strategy offered to the jump host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthMethod {
    Password(String),
    PrivateKey {
        path: String,
        passphrase: Option<String>,
    },
    Agent,
}

impl AuthMethod {
    /// Password beats private key, private key beats agent. Only the first
    /// match is ever tried.
    pub fn select(config: &TunnelConfig) -> AuthMethod {
        if let Some(password) = non_empty(&config.password) {
            return AuthMethod::Password(password.to_string());
        }
        if let Some(path) = non_empty(&config.private_key_path) {
            return AuthMethod::PrivateKey {
                path: path.to_string(),
                passphrase: non_empty(&config.key_passphrase).map(str::to_string),
            };
        }
        AuthMethod::Agent
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PrivateKey { .. } => "publickey",
            AuthMethod::Agent => "agent",
        }
    }
}

/// Material ready to be handed to the ssh session.
pub(crate) enum Credentials {
    Password(String),
    PrivateKey(PrivateKey),
    Agent {
        client: AgentClient<UnixStream>,
        identities: Vec<PublicKey>,
    },
}

impl Credentials {
    pub fn method_name(&self) -> &'static str {
        match self {
            Credentials::Password(_) => "password",
            Credentials::PrivateKey(_) => "publickey",
            Credentials::Agent { .. } => "agent",
        }
    }
}

pub(crate) struct AuthResolver {
    /// unix socket of the identity agent, usually `$SSH_AUTH_SOCK`
    agent_socket: Option<PathBuf>,
}

impl AuthResolver {
    pub fn new(agent_socket: Option<PathBuf>) -> Self {
        AuthResolver { agent_socket }
    }

    pub fn from_env() -> Self {
        AuthResolver::new(std::env::var_os(AGENT_SOCKET_ENV).map(PathBuf::from))
    }

    pub async fn resolve(&self, config: &TunnelConfig) -> Result<Credentials, AuthError> {
        if config.username.is_empty() {
            return Err(AuthError::Config("no ssh username configured".to_string()));
        }
        let method = AuthMethod::select(config);
        debug!("using {} authentication for {}", method.name(), config.address());
        match method {
            AuthMethod::Password(password) => Ok(Credentials::Password(password)),
            AuthMethod::PrivateKey { path, passphrase } => Ok(Credentials::PrivateKey(
                load_private_key(&path, passphrase.as_deref())?,
            )),
            AuthMethod::Agent => self.connect_agent().await,
        }
    }

    async fn connect_agent(&self) -> Result<Credentials, AuthError> {
        let socket = self.agent_socket.as_ref().ok_or_else(|| {
            AuthError::AgentUnavailable(format!("{AGENT_SOCKET_ENV} is not set"))
        })?;
        let mut client = AgentClient::connect_uds(socket).await.map_err(|e| {
            AuthError::AgentUnavailable(format!("{}: {}", socket.display(), e))
        })?;
        let identities = client
            .request_identities()
            .await
            .map_err(|e| AuthError::AgentUnavailable(e.to_string()))?;
        if identities.is_empty() {
            return Err(AuthError::Config(
                "the ssh agent does not hold any identity".to_string(),
            ));
        }
        debug!("ssh agent offers {} identities", identities.len());
        Ok(Credentials::Agent { client, identities })
    }
}

fn load_private_key(path: &str, passphrase: Option<&str>) -> Result<PrivateKey, AuthError> {
    let expanded = expand_home(path);
    load_secret_key(&expanded, passphrase).map_err(|source| AuthError::KeyLoad {
        path: expanded.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        format!("{}/testdata/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    fn tunnel_config() -> TunnelConfig {
        TunnelConfig {
            enabled: true,
            host: String::from("bastion"),
            port: 22,
            username: String::from("ops"),
            ..TunnelConfig::default()
        }
    }

    fn unreachable_agent() -> AuthResolver {
        AuthResolver::new(Some(PathBuf::from("/nonexistent/procreaper/agent.sock")))
    }

    #[test]
    fn password_wins_over_everything() {
        let config = TunnelConfig {
            password: Some(String::from("hunter2")),
            private_key_path: Some(String::from("~/.ssh/id_ed25519")),
            key_passphrase: Some(String::from("pass")),
            ..tunnel_config()
        };
        assert_eq!(
            AuthMethod::select(&config),
            AuthMethod::Password(String::from("hunter2"))
        );
    }

    #[test]
    fn private_key_when_no_password() {
        let config = TunnelConfig {
            password: Some(String::new()),
            private_key_path: Some(String::from("~/.ssh/id_ed25519")),
            key_passphrase: Some(String::from("pass")),
            ..tunnel_config()
        };
        assert_eq!(
            AuthMethod::select(&config),
            AuthMethod::PrivateKey {
                path: String::from("~/.ssh/id_ed25519"),
                passphrase: Some(String::from("pass")),
            }
        );
    }

    #[test]
    fn empty_passphrase_means_unencrypted_key() {
        let config = TunnelConfig {
            private_key_path: Some(String::from("key")),
            key_passphrase: Some(String::new()),
            ..tunnel_config()
        };
        assert_eq!(
            AuthMethod::select(&config),
            AuthMethod::PrivateKey {
                path: String::from("key"),
                passphrase: None,
            }
        );
    }

    #[test]
    fn agent_when_nothing_else() {
        assert_eq!(AuthMethod::select(&tunnel_config()), AuthMethod::Agent);
        let config = TunnelConfig {
            password: Some(String::new()),
            private_key_path: Some(String::new()),
            ..tunnel_config()
        };
        assert_eq!(AuthMethod::select(&config), AuthMethod::Agent);
    }

    #[tokio::test]
    async fn resolves_password() {
        let config = TunnelConfig {
            password: Some(String::from("hunter2")),
            ..tunnel_config()
        };
        let credentials = unreachable_agent().resolve(&config).await.unwrap();
        assert!(matches!(credentials, Credentials::Password(p) if p == "hunter2"));
    }

    #[tokio::test]
    async fn loads_plain_private_key() {
        let config = TunnelConfig {
            private_key_path: Some(fixture("id_ed25519")),
            ..tunnel_config()
        };
        let credentials = unreachable_agent().resolve(&config).await.unwrap();
        assert_eq!(credentials.method_name(), "publickey");
    }

    #[tokio::test]
    async fn loads_encrypted_private_key() {
        let config = TunnelConfig {
            private_key_path: Some(fixture("id_ed25519_encrypted")),
            key_passphrase: Some(String::from("s3cret")),
            ..tunnel_config()
        };
        let credentials = unreachable_agent().resolve(&config).await.unwrap();
        assert!(matches!(credentials, Credentials::PrivateKey(_)));
    }

    #[tokio::test]
    async fn garbage_key_is_a_key_load_error() {
        let config = TunnelConfig {
            private_key_path: Some(fixture("garbage_key")),
            ..tunnel_config()
        };
        let result = unreachable_agent().resolve(&config).await;
        assert!(matches!(result, Err(AuthError::KeyLoad { .. })));
    }

    #[tokio::test]
    async fn missing_key_file_is_a_key_load_error() {
        let config = TunnelConfig {
            private_key_path: Some(fixture("does_not_exist")),
            ..tunnel_config()
        };
        match unreachable_agent().resolve(&config).await {
            Err(AuthError::KeyLoad { path, .. }) => assert!(path.ends_with("does_not_exist")),
            _ => panic!("expected a key load error"),
        }
    }

    #[tokio::test]
    async fn unreachable_agent_is_reported() {
        let result = unreachable_agent().resolve(&tunnel_config()).await;
        assert!(matches!(result, Err(AuthError::AgentUnavailable(_))));
    }

    #[tokio::test]
    async fn unset_agent_socket_is_reported() {
        let result = AuthResolver::new(None).resolve(&tunnel_config()).await;
        assert!(matches!(result, Err(AuthError::AgentUnavailable(_))));
    }

    #[tokio::test]
    async fn empty_username_is_a_config_error() {
        let config = TunnelConfig {
            username: String::new(),
            password: Some(String::from("hunter2")),
            ..tunnel_config()
        };
        let result = unreachable_agent().resolve(&config).await;
        assert!(matches!(result, Err(AuthError::Config(_))));
    }
}
