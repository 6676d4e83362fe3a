use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FerryError {
    #[error("config not found at {0}: run 'ferry config init'")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid duration '{0}': expected a number with an optional h, m, s or ms suffix")]
    InvalidDuration(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("{store} store: {message}")]
    Store { store: String, message: String },

    #[error("catalog: {0}")]
    Catalog(String),

    #[error("{component} unreachable: {message}")]
    Infrastructure { component: String, message: String },

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FerryError {
    pub fn store(store: impl Into<String>, message: impl Into<String>) -> Self {
        FerryError::Store {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Missing objects and malformed keys fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FerryError::ObjectNotFound(_)
                | FerryError::InvalidKey(_)
                | FerryError::InvalidLocator { .. }
        )
    }

    pub fn infrastructure(component: impl Into<String>, source: &FerryError) -> Self {
        FerryError::Infrastructure {
            component: component.into(),
            message: source.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FerryError>;
