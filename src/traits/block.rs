use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::errors::{BlockError, BlockResult};
use crate::message::Message;

/// Per-block configuration as found under `config` in the engine document.
pub type BlockConfig = serde_json::Value;

/// An output endpoint a block emits messages through.
///
/// The engine hands blocks the real [`Port`](crate::engine::Port) behind
/// this trait; tests substitute fakes that record what was dispatched.
pub trait MessagePort: Send + Sync {
    fn name(&self) -> &str;

    /// Forward a message to every route attached to this port.
    fn dispatch(&self, message: Message);
}

/// Resolves a block's declared output ports during initialization.
pub trait PortLookup: Send + Sync {
    fn output_port(&self, block: &str, port: &str) -> Option<Arc<dyn MessagePort>>;
}

/// Handle passed to [`Block::initialize`], scoped to the block being
/// initialized. All blocks, ports, routes, and dispatchers exist by the
/// time it is constructed.
pub struct InitContext<'a> {
    block: &'a str,
    ports: &'a dyn PortLookup,
}

impl<'a> InitContext<'a> {
    pub fn new(block: &'a str, ports: &'a dyn PortLookup) -> Self {
        Self { block, ports }
    }

    /// Name of the block being initialized.
    pub fn block(&self) -> &str {
        self.block
    }

    /// Look up one of this block's own declared output ports.
    pub fn output_port(&self, name: &str) -> BlockResult<Arc<dyn MessagePort>> {
        self.ports
            .output_port(self.block, name)
            .ok_or_else(|| BlockError::MissingPort(name.to_string()))
    }
}

/// A named processing unit in the graph.
///
/// Role capabilities are queried rather than inherited: the manager asks
/// for the producer view while building ports, the consumer view while
/// resolving route destinations, and the runnable view when spawning
/// worker tasks. The default answers are "none".
#[async_trait]
pub trait Block: Send + Sync {
    fn name(&self) -> &str;

    /// Called once, after every block, port, route, and dispatcher exists
    /// and before any message is delivered.
    async fn initialize(&self, config: &BlockConfig, ctx: &InitContext<'_>) -> BlockResult<()>;

    fn as_producer(&self) -> Option<&dyn Producer> {
        None
    }

    fn as_consumer(&self) -> Option<&dyn Consumer> {
        None
    }

    fn as_runnable(&self) -> Option<&dyn Runnable> {
        None
    }
}

/// Capability of blocks that own output ports.
pub trait Producer: Send + Sync {
    /// The output port names this block declares, as a function of its own
    /// configuration. Called during graph build, before `initialize`.
    /// Names must satisfy the name grammar and be unique per block.
    fn ports(&self, config: &BlockConfig) -> BlockResult<Vec<String>>;
}

/// Capability of blocks that accept messages from routes.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Deliver one message. Invoked from whichever dispatcher task serves
    /// the route; implementations that need a thread of their own hand the
    /// message off to an internal queue.
    async fn consume(&self, message: Message) -> BlockResult<()>;
}

/// Capability of blocks that own a worker task.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Invoked once on a dedicated task. Must return once `shutdown` is
    /// cancelled.
    async fn run(&self, shutdown: CancellationToken) -> BlockResult<()>;
}

/// Decode a block's configuration document into its config struct.
pub fn read_config<T: DeserializeOwned>(config: &BlockConfig) -> BlockResult<T> {
    serde_json::from_value(config.clone()).map_err(BlockError::config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct DemoConfig {
        label: String,
        #[serde(default)]
        retries: u32,
    }

    #[test]
    fn read_config_decodes_and_defaults() {
        let cfg: DemoConfig = read_config(&json!({"label": "x"})).unwrap();
        assert_eq!(cfg.label, "x");
        assert_eq!(cfg.retries, 0);
    }

    #[test]
    fn read_config_reports_shape_errors() {
        let err = read_config::<DemoConfig>(&json!({"retries": 3})).unwrap_err();
        assert!(matches!(err, BlockError::InvalidConfig(_)));
    }
}
