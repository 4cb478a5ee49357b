pub mod csv_loader;

use investta_core::EngineError;

pub use csv_loader::{load_series_from_csv, load_series_from_reader};

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
