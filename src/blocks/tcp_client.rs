use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::engine::registry::BlockDescription;
use crate::errors::{BlockError, BlockResult};
use crate::message::Message;
use crate::traits::{
    read_config, Block, BlockConfig, InitContext, MessagePort, Producer, Runnable,
};

const OUTPUT_PORT: &str = "default";

fn default_retry_delay() -> u64 {
    2
}

fn default_buffer_size() -> usize {
    1024
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TcpClientConfig {
    host: String,
    port: u16,
    /// Seconds to wait before reconnecting.
    #[serde(default = "default_retry_delay")]
    retry_delay: u64,
    #[serde(default = "default_buffer_size")]
    buffer_size: usize,
}

/// Source that reads a TCP stream and emits every received chunk as one
/// message on its `default` port. The connection is retried forever with a
/// configurable delay; shutdown interrupts connecting, waiting, and
/// reading alike.
pub struct TcpClient {
    name: String,
    state: Mutex<Option<TcpClientState>>,
}

struct TcpClientState {
    config: TcpClientConfig,
    output: Arc<dyn MessagePort>,
}

impl TcpClient {
    pub const CLASS_NAME: &'static str = "tcp-client";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(None),
        }
    }

    pub fn description() -> BlockDescription {
        BlockDescription::new(Self::CLASS_NAME, |name| Arc::new(TcpClient::new(name)))
    }
}

#[async_trait]
impl Block for TcpClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &BlockConfig, ctx: &InitContext<'_>) -> BlockResult<()> {
        let config: TcpClientConfig = read_config(config)?;
        if config.buffer_size == 0 {
            return Err(BlockError::InvalidConfig(
                "bufferSize shall be at least 1".to_string(),
            ));
        }
        let output = ctx.output_port(OUTPUT_PORT)?;
        *self.state.lock().await = Some(TcpClientState { config, output });
        Ok(())
    }

    fn as_producer(&self) -> Option<&dyn Producer> {
        Some(self)
    }

    fn as_runnable(&self) -> Option<&dyn Runnable> {
        Some(self)
    }
}

impl Producer for TcpClient {
    fn ports(&self, _config: &BlockConfig) -> BlockResult<Vec<String>> {
        Ok(vec![OUTPUT_PORT.to_string()])
    }
}

#[async_trait]
impl Runnable for TcpClient {
    async fn run(&self, shutdown: CancellationToken) -> BlockResult<()> {
        let (config, output) = {
            let guard = self.state.lock().await;
            let state = guard.as_ref().ok_or_else(|| {
                BlockError::Runtime("tcp client used before initialize".to_string())
            })?;
            (state.config.clone(), Arc::clone(&state.output))
        };

        let retry = Duration::from_secs(config.retry_delay);
        let mut buffer = vec![0u8; config.buffer_size];

        loop {
            tracing::info!("{}: connecting to {}:{}", self.name, config.host, config.port);
            let connect = TcpStream::connect((config.host.as_str(), config.port));
            let mut stream = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                connected = connect => match connected {
                    Ok(stream) => stream,
                    Err(error) => {
                        tracing::warn!("{}: connection failed: {}", self.name, error);
                        if !wait_or_shutdown(retry, &shutdown).await {
                            return Ok(());
                        }
                        continue;
                    }
                },
            };
            tracing::info!("{}: connected", self.name);

            loop {
                let read = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Ok(()),
                    read = stream.read(&mut buffer) => read,
                };
                match read {
                    Ok(0) => {
                        tracing::info!("{}: connection closed by peer", self.name);
                        break;
                    }
                    Ok(received) => {
                        output.dispatch(Message::copy_from_slice(&buffer[..received]));
                    }
                    Err(error) => {
                        tracing::warn!("{}: read failed: {}", self.name, error);
                        break;
                    }
                }
            }

            if !wait_or_shutdown(retry, &shutdown).await {
                return Ok(());
            }
        }
    }
}

/// Sleep for `delay`, returning false when shutdown fired first.
async fn wait_or_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
