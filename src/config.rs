use std::{
    env::VarError,
    path::{Path, PathBuf},
};

use serde::{
    Deserialize,
    de::{self, Visitor},
};
use thiserror::Error;

use crate::{database::DbConfig, tunneling::tunnel_config::TunnelConfig};

pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("fail to read config {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("fail to parse config")]
    Parse(#[from] toml::de::Error),
    #[error("{field}: environment variable {name} {reason}")]
    Env {
        field: &'static str,
        name: String,
        reason: &'static str,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The validated configuration handed to the reaper.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Config {
    pub database: DbConfig,
    pub tunnel: TunnelConfig,
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct ReaperConfigFile {
    pub mysql: MysqlSection,
    pub ssh_tunnel: Option<SshTunnelSection>,
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct MysqlSection {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub username: String,
    pub password: Option<Secret>,
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct SshTunnelSection {
    #[serde(default)]
    pub use_tunnel: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    pub password: Option<Secret>,
    pub private_key: Option<String>,
    pub key_passphrase: Option<Secret>,
}
/// A secret written inline, as `{ value = "..." }` or as `{ from_env = "VAR" }`.
#[derive(Clone, PartialEq, Debug)]
pub(crate) struct Secret {
    from_env: Option<String>,
    value: Option<String>,
}

fn default_mysql_port() -> u16 {
    DEFAULT_MYSQL_PORT
}
fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl Secret {
    pub fn resolve(&self, field: &'static str) -> Result<String, ConfigError> {
        if let Some(value) = &self.value {
            return Ok(value.clone());
        }
        let name = self.from_env.clone().unwrap_or_default();
        std::env::var(&name).map_err(|e| ConfigError::Env {
            field,
            name,
            reason: match e {
                VarError::NotPresent => "not found in the environment",
                VarError::NotUnicode(_) => "is not unicode",
            },
        })
    }
}

fn resolve_optional(
    secret: &Option<Secret>,
    field: &'static str,
) -> Result<Option<String>, ConfigError> {
    secret.as_ref().map(|s| s.resolve(field)).transpose()
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SecretVisitor;
        impl<'de> Visitor<'de> for SecretVisitor {
            type Value = Secret;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a map with `from_env` or `value` set")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Secret {
                    from_env: None,
                    value: Some(v.to_string()),
                })
            }
            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut from_env = None;
                let mut value = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "from_env" => from_env = Some(map.next_value()?),
                        "value" => value = Some(map.next_value()?),
                        _ => return Err(de::Error::unknown_field(&key, &["from_env", "value"])),
                    }
                }

                if from_env.is_none() && value.is_none() {
                    return Err(de::Error::custom(
                        "at least one between `from_env` or `value` must be provided!",
                    ));
                }
                if value.is_some() {
                    from_env = None; // value takes precedence
                }
                Ok(Secret { value, from_env })
            }
        }
        deserializer.deserialize_any(SecretVisitor)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Config, ConfigError> {
        let file: ReaperConfigFile = toml::from_str(raw)?;
        Config::try_from(file)
    }
}

impl TryFrom<ReaperConfigFile> for Config {
    type Error = ConfigError;

    fn try_from(file: ReaperConfigFile) -> Result<Self, Self::Error> {
        let mysql = file.mysql;
        if mysql.host.is_empty() {
            return Err(ConfigError::Invalid("mysql.host is empty".to_string()));
        }
        let database = DbConfig {
            host: mysql.host,
            port: mysql.port,
            username: mysql.username,
            password: resolve_optional(&mysql.password, "mysql.password")?.unwrap_or_default(),
        };
        let tunnel = match file.ssh_tunnel {
            Some(section) if section.use_tunnel => tunnel_config(section)?,
            _ => TunnelConfig::disabled(),
        };
        Ok(Config { database, tunnel })
    }
}

fn tunnel_config(section: SshTunnelSection) -> Result<TunnelConfig, ConfigError> {
    if section.host.is_empty() {
        return Err(ConfigError::Invalid(
            "ssh_tunnel.host is required when use_tunnel is set".to_string(),
        ));
    }
    if section.username.is_empty() {
        return Err(ConfigError::Invalid(
            "ssh_tunnel.username is required when use_tunnel is set".to_string(),
        ));
    }
    Ok(TunnelConfig {
        enabled: true,
        password: resolve_optional(&section.password, "ssh_tunnel.password")?,
        key_passphrase: resolve_optional(&section.key_passphrase, "ssh_tunnel.key_passphrase")?,
        host: section.host,
        port: section.port,
        username: section.username,
        private_key_path: section.private_key,
    })
}

/// Replaces a leading `~` with the current user's home directory.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}
