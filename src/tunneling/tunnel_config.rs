/// Validated settings for the SSH hop in front of the database.
///
/// When `enabled` is false nothing else in here is looked at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct TunnelConfig {
    pub enabled: bool,
    /// address of the machine used as a jump host
    pub host: String,
    /// jump host ssh port
    pub port: u16,
    /// the ssh user
    pub username: String,
    pub password: Option<String>,
    /// private key used for connecting to the jump host (may start with `~`)
    pub private_key_path: Option<String>,
    pub key_passphrase: Option<String>,
}

impl TunnelConfig {
    pub fn disabled() -> Self {
        TunnelConfig::default()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Treats `Some("")` as absent.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
