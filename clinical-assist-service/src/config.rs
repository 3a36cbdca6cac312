use clinical_assist::ClientConfig;
use clinical_assist::config::env_or;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub client: ClientConfig,
}

impl ServiceConfig {
    /// `PORT` plus everything [`ClientConfig::from_env`] reads.
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", DEFAULT_PORT),
            client: ClientConfig::from_env(),
        }
    }
}
