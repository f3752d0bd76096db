use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::engine::mailbox::Mailbox;
use crate::engine::registry::BlockDescription;
use crate::errors::{BlockError, BlockResult};
use crate::message::Message;
use crate::traits::{read_config, Block, BlockConfig, Consumer, InitContext, Runnable};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum RotationStrategy {
    #[default]
    None,
    Time,
    Size,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RotationConfig {
    strategy: RotationStrategy,
    /// Minutes between rotations (time strategy).
    #[serde(default)]
    delay: u64,
    /// Bytes written before rotating (size strategy).
    #[serde(default)]
    size: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileLoggerConfig {
    folder: PathBuf,
    /// File name with a `{}` placeholder replaced by a UTC
    /// `%Y%m%d-%H%M%S` timestamp at open time.
    file_name_template: String,
    #[serde(default)]
    rotation: Option<RotationConfig>,
}

/// Sink appending raw payloads to a file, optionally rotated by age or by
/// written size. Open and write failures are logged, never fatal.
pub struct FileLogger {
    name: String,
    mailbox: Mailbox,
    state: Mutex<Option<FileLoggerState>>,
}

impl FileLogger {
    pub const CLASS_NAME: &'static str = "file-logger";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mailbox: Mailbox::new(),
            state: Mutex::new(None),
        }
    }

    pub fn description() -> BlockDescription {
        BlockDescription::new(Self::CLASS_NAME, |name| Arc::new(FileLogger::new(name)))
    }
}

#[async_trait]
impl Block for FileLogger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &BlockConfig, _ctx: &InitContext<'_>) -> BlockResult<()> {
        let config: FileLoggerConfig = read_config(config)?;

        if let Some(rotation) = &config.rotation {
            match rotation.strategy {
                RotationStrategy::Time if rotation.delay == 0 => {
                    return Err(BlockError::InvalidConfig(
                        "time rotation needs a delay in minutes".to_string(),
                    ));
                }
                RotationStrategy::Size if rotation.size == 0 => {
                    return Err(BlockError::InvalidConfig(
                        "size rotation needs a size in bytes".to_string(),
                    ));
                }
                _ => {}
            }
        }

        *self.state.lock().await = Some(FileLoggerState {
            config,
            current: None,
        });
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
impl Consumer for FileLogger {
    async fn consume(&self, message: Message) -> BlockResult<()> {
        self.mailbox.push(message);
        Ok(())
    }
}

#[async_trait]
impl Runnable for FileLogger {
    async fn run(&self, shutdown: CancellationToken) -> BlockResult<()> {
        {
            let guard = self.state.lock().await;
            if guard.is_none() {
                return Err(BlockError::Runtime(
                    "sink used before initialize".to_string(),
                ));
            }
        }

        while let Some(message) = self.mailbox.next(&shutdown).await {
            let mut guard = self.state.lock().await;
            if let Some(state) = guard.as_mut() {
                state.process(&self.name, &message);
            }
        }
        Ok(())
    }
}

struct OpenFile {
    file: File,
    opened: Instant,
    written: u64,
}

struct FileLoggerState {
    config: FileLoggerConfig,
    current: Option<OpenFile>,
}

impl FileLoggerState {
    fn process(&mut self, name: &str, message: &Message) {
        if self.should_rotate() {
            tracing::info!("{}: rotating log file", name);
            self.current = None;
        }

        if self.current.is_none() {
            let path = self.next_path();
            match File::create(&path) {
                Ok(file) => {
                    self.current = Some(OpenFile {
                        file,
                        opened: Instant::now(),
                        written: 0,
                    });
                }
                Err(error) => {
                    tracing::error!("{}: failed to open {}: {}", name, path.display(), error);
                    return;
                }
            }
        }

        if message.is_empty() {
            return;
        }

        if let Some(open) = self.current.as_mut() {
            if let Err(error) = open
                .file
                .write_all(message.payload())
                .and_then(|()| open.file.flush())
            {
                tracing::error!("{}: write failed: {}", name, error);
                return;
            }
            open.written += message.len() as u64;
        }
    }

    fn should_rotate(&self) -> bool {
        let (Some(rotation), Some(open)) = (&self.config.rotation, &self.current) else {
            return false;
        };
        match rotation.strategy {
            RotationStrategy::None => false,
            RotationStrategy::Time => {
                open.opened.elapsed() >= Duration::from_secs(rotation.delay * 60)
            }
            RotationStrategy::Size => open.written >= rotation.size,
        }
    }

    fn next_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let file_name = self.config.file_name_template.replace("{}", &stamp);
        self.config.folder.join(file_name)
    }
}
