use thiserror::Error;

/// Errors raised by a block, either during `initialize` or while running.
#[derive(Error, Debug)]
pub enum BlockError {
    /// The block-specific configuration document has the wrong shape.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The block asked for an output port its producer role never declared.
    #[error("output port '{0}' not found")]
    MissingPort(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Runtime(String),
}

impl BlockError {
    /// Wrap a serde decoding failure of a block config document.
    pub fn config(err: impl std::fmt::Display) -> Self {
        BlockError::InvalidConfig(err.to_string())
    }
}

pub type BlockResult<T> = Result<T, BlockError>;
