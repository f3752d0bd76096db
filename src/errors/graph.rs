use thiserror::Error;

use crate::errors::BlockError;

/// Errors raised while loading modules and building the block graph.
///
/// Any of these aborts `Manager::initialize`; no partial graph ever runs.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("'{0}' is not a valid name (expected ^[a-z][a-z0-9-]*$)")]
    InvalidName(String),

    #[error("block '{0}' is already defined")]
    DuplicateBlock(String),

    #[error("block '{block}': another port is already named '{port}'")]
    DuplicatePort { block: String, port: String },

    #[error("no block registered with class name '{0}'")]
    UnknownClass(String),

    #[error("route '{route}': block '{block}' not found")]
    UnknownBlock { route: String, block: String },

    #[error("route '{route}': port '{port}' not found")]
    UnknownPort { route: String, port: String },

    #[error("route '{route}': block '{block}' has more than one port, a port name is required")]
    AmbiguousPort { route: String, block: String },

    #[error("route '{route}': block '{block}' is not a consumer")]
    NotAConsumer { route: String, block: String },

    #[error("route '{0}' is already defined")]
    DuplicateRoute(String),

    #[error("route '{route}': dispatcher name '{name}' is reserved")]
    ReservedDispatcher { route: String, name: String },

    #[error("route '{0}': sources and destinations shall not be empty")]
    EmptyRoute(String),

    #[error("module '{module}' failed to register its blocks: {reason}")]
    ModuleLoad { module: String, reason: String },

    #[error("failed to initialize block '{block}': {source}")]
    BlockInit {
        block: String,
        #[source]
        source: BlockError,
    },
}

pub type GraphResult<T> = Result<T, GraphError>;
