use crate::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),

    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Query state not found: {0}")]
    StateNotFound(String),

    #[error("No resolution modules configured")]
    NoModules,

    #[error("Module {module} failed to initialize: {reason}")]
    ModuleInit { module: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
