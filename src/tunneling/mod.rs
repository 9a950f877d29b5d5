pub(crate) mod auth;
pub(crate) mod handler;
pub(crate) mod tunnel;
pub(crate) mod tunnel_config;
