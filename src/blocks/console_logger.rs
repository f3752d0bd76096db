use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::engine::mailbox::Mailbox;
use crate::engine::registry::BlockDescription;
use crate::errors::{BlockError, BlockResult};
use crate::message::Message;
use crate::traits::{read_config, Block, BlockConfig, Consumer, InitContext, Runnable};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConsoleLoggerConfig {
    /// Prefix label printed ahead of every payload.
    pattern: String,
}

/// Sink printing every payload to stdout as `"{pattern} | {payload}"`.
///
/// Delivery is decoupled from printing: `consume` only queues, the block's
/// own worker does the writing.
pub struct ConsoleLogger {
    name: String,
    mailbox: Mailbox,
    pattern: Mutex<Option<String>>,
}

impl ConsoleLogger {
    pub const CLASS_NAME: &'static str = "console-logger";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mailbox: Mailbox::new(),
            pattern: Mutex::new(None),
        }
    }

    pub fn description() -> BlockDescription {
        BlockDescription::new(Self::CLASS_NAME, |name| Arc::new(ConsoleLogger::new(name)))
    }
}

#[async_trait]
impl Block for ConsoleLogger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &BlockConfig, _ctx: &InitContext<'_>) -> BlockResult<()> {
        let config: ConsoleLoggerConfig = read_config(config)?;
        *self.pattern.lock().await = Some(config.pattern);
        Ok(())
    }

    fn as_consumer(&self) -> Option<&dyn Consumer> {
        Some(self)
    }

    fn as_runnable(&self) -> Option<&dyn Runnable> {
        Some(self)
    }
}

#[async_trait]
impl Consumer for ConsoleLogger {
    async fn consume(&self, message: Message) -> BlockResult<()> {
        self.mailbox.push(message);
        Ok(())
    }
}

#[async_trait]
impl Runnable for ConsoleLogger {
    async fn run(&self, shutdown: CancellationToken) -> BlockResult<()> {
        let pattern = self
            .pattern
            .lock()
            .await
            .clone()
            .ok_or_else(|| BlockError::Runtime("sink used before initialize".to_string()))?;

        while let Some(message) = self.mailbox.next(&shutdown).await {
            println!("{} | {}", pattern, String::from_utf8_lossy(message.payload()));
        }
        Ok(())
    }
}
