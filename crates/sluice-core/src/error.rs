use sluice_transport::TransportError;
use sluice_warehouse::WarehouseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("extraction failed: {0}")]
    Extraction(#[from] TransportError),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("malformed tabular payload: {0}")]
    Format(String),

    #[error("load failed: {0}")]
    Load(#[from] WarehouseError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
