use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum BusError {
    /// No [`GlobalProvider`](crate::provider::GlobalProvider) is mounted on this thread.
    #[error("no global provider is mounted")]
    NoProvider,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
