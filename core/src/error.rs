//! Crate-wide error type.
//!
//! Each layer keeps its own `thiserror` enum (`TensorError`, `PlacementError`) and folds
//! into [`Error`] at the public boundary. Invariant violations (an interface op with more
//! than one output, an empty hierarchy, a DDP rank mismatch) are panics, not variants.

use thiserror::Error;

use crate::placement::PlacementError;
use crate::tensor::TensorError;

#[derive(Error, Debug)]
pub enum Error {
    /// A name the op-attribute resolver does not know.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    /// Host data could not be converted to or from a blob's tensor description.
    #[error("Conversion error: {0}")]
    Conversion(#[from] TensorError),
    #[error("Placement error: {0}")]
    Placement(#[from] PlacementError),
    /// A build failed inside the runtime, or the runtime went away.
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Collective error: {0}")]
    Collective(String),
    #[error("No default session: enter a session before using the free interface functions")]
    NoDefaultSession,
    #[error("Config error: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn op_not_found(name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "interface op",
            name: name.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
