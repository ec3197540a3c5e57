use thiserror::Error;

use trestle_providers::CatalogError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Provider(#[from] CatalogError),

    #[error("unknown approval ID: {0}")]
    UnknownApproval(String),

    #[error("approval {0} already resolved")]
    AlreadyResolved(String),

    #[error("no adapter connected for {0}")]
    GatewayUnavailable(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
