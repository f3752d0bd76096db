use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::blocks::framer::{FrameScan, OUTPUT_PORT};
use crate::engine::registry::BlockDescription;
use crate::errors::{BlockError, BlockResult};
use crate::message::Message;
use crate::traits::{
    read_config, Block, BlockConfig, Consumer, InitContext, MessagePort, Producer,
};

const DEFAULT_BUFFER_SIZE: usize = 1024;
const END: &[u8] = b"\r\n";

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NmeaFramerConfig {
    #[serde(default = "default_buffer_size")]
    buffer_size: usize,
}

/// Extracts NMEA 0183 sentences from a chunked byte stream.
///
/// A fixed-function sibling of [`Framer`](crate::blocks::Framer): a
/// sentence starts at `'$'` or `'!'` and ends with `"\r\n"`. Because the
/// start condition is a single byte there is never a partial start
/// sequence to retain across chunks.
pub struct NmeaFramer {
    name: String,
    state: Mutex<Option<NmeaFramerState>>,
}

impl NmeaFramer {
    pub const CLASS_NAME: &'static str = "nmea-framer";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(None),
        }
    }

    pub fn description() -> BlockDescription {
        BlockDescription::new(Self::CLASS_NAME, |name| Arc::new(NmeaFramer::new(name)))
    }
}

#[async_trait]
impl Block for NmeaFramer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &BlockConfig, ctx: &InitContext<'_>) -> BlockResult<()> {
        let config: NmeaFramerConfig = read_config(config)?;
        if config.buffer_size == 0 {
            return Err(BlockError::InvalidConfig(
                "bufferSize shall be at least 1".to_string(),
            ));
        }

        let output = ctx.output_port(OUTPUT_PORT)?;
        *self.state.lock().await = Some(NmeaFramerState {
            output,
            buffer: Vec::with_capacity(config.buffer_size),
            capacity: config.buffer_size,
        });
        Ok(())
    }

    fn as_producer(&self) -> Option<&dyn Producer> {
        Some(self)
    }

    fn as_consumer(&self) -> Option<&dyn Consumer> {
        Some(self)
    }
}

impl Producer for NmeaFramer {
    fn ports(&self, _config: &BlockConfig) -> BlockResult<Vec<String>> {
        Ok(vec![OUTPUT_PORT.to_string()])
    }
}

#[async_trait]
impl Consumer for NmeaFramer {
    async fn consume(&self, message: Message) -> BlockResult<()> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| BlockError::Runtime("framer used before initialize".to_string()))?;
        state.consume(&self.name, message.payload());
        Ok(())
    }
}

struct NmeaFramerState {
    output: Arc<dyn MessagePort>,
    buffer: Vec<u8>,
    capacity: usize,
}

impl NmeaFramerState {
    fn consume(&mut self, name: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        if self.buffer.is_empty() {
            self.scan_message(name, data);
            return;
        }

        self.append(name, data);

        // A sentence needs at least the start byte and "\r\n".
        if self.buffer.len() >= 3 {
            self.scan_buffer(name);
        }
    }

    fn scan_message(&mut self, name: &str, data: &[u8]) {
        let mut begin = 0usize;

        while begin < data.len() {
            match find_sentence(&data[begin..]) {
                FrameScan::Frame { offset, len } => {
                    let frame = begin + offset;
                    self.output
                        .dispatch(Message::copy_from_slice(&data[frame..frame + len]));
                    if offset > 0 {
                        tracing::warn!("{}: {} bytes skipped", name, offset);
                    }
                    begin = frame + len;
                }
                FrameScan::Partial { offset } => {
                    if offset > 0 {
                        tracing::warn!("{}: {} bytes skipped", name, offset);
                    }
                    let mut tail = begin + offset;
                    if data.len() - tail > self.capacity {
                        let lost = data.len() - tail - self.capacity;
                        tail += lost;
                        tracing::warn!(
                            "{}: {} bytes discarded, the buffer is too small",
                            name,
                            lost
                        );
                    }
                    self.buffer.extend_from_slice(&data[tail..]);
                    break;
                }
                FrameScan::Nothing => {
                    tracing::warn!("{}: {} bytes skipped", name, data.len() - begin);
                    break;
                }
            }
        }
    }

    fn append(&mut self, name: &str, data: &[u8]) {
        if self.buffer.len() + data.len() <= self.capacity {
            self.buffer.extend_from_slice(data);
            return;
        }

        if data.len() > self.capacity {
            tracing::warn!(
                "{}: the buffer ({} bytes) is too small for the message ({} bytes)",
                name,
                self.capacity,
                data.len()
            );
        }

        if data.len() >= self.capacity {
            let skipped = self.buffer.len() + data.len() - self.capacity;
            tracing::warn!("{}: {} bytes skipped", name, skipped);
            self.buffer.clear();
            self.buffer
                .extend_from_slice(&data[data.len() - self.capacity..]);
        } else {
            let kept = self.capacity - data.len();
            let lost = self.buffer.len() - kept;
            tracing::warn!("{}: {} bytes skipped", name, lost);
            self.buffer.drain(..lost);
            self.buffer.extend_from_slice(data);
        }
    }

    fn scan_buffer(&mut self, name: &str) {
        let total = self.buffer.len();
        let mut begin = 0usize;
        let mut keep = total..total;

        while begin < total {
            match find_sentence(&self.buffer[begin..total]) {
                FrameScan::Frame { offset, len } => {
                    let frame = begin + offset;
                    self.output
                        .dispatch(Message::copy_from_slice(&self.buffer[frame..frame + len]));
                    if offset > 0 {
                        tracing::warn!("{}: {} bytes skipped", name, offset);
                    }
                    begin = frame + len;
                }
                FrameScan::Partial { offset } => {
                    if offset > 0 {
                        tracing::warn!("{}: {} bytes skipped", name, offset);
                    }
                    keep = begin + offset..total;
                    break;
                }
                FrameScan::Nothing => {
                    tracing::warn!("{}: {} bytes skipped", name, total - begin);
                    break;
                }
            }
        }

        self.buffer.copy_within(keep.clone(), 0);
        self.buffer.truncate(keep.len());
    }
}

fn is_start(byte: u8) -> bool {
    byte == b'$' || byte == b'!'
}

/// Locate the first complete NMEA sentence in `data`, adjusting past
/// unterminated sentence starts exactly like the configurable framer.
pub(crate) fn find_sentence(data: &[u8]) -> FrameScan {
    let Some(first) = data.iter().position(|&byte| is_start(byte)) else {
        return FrameScan::Nothing;
    };

    if first + 1 >= data.len() {
        return FrameScan::Partial { offset: first };
    }

    match find_end(&data[first + 1..]) {
        Some(relative) => {
            let end_at = first + 1 + relative;
            let offset = last_start(data, first, end_at);
            FrameScan::Frame {
                offset,
                len: end_at - offset + END.len(),
            }
        }
        None => FrameScan::Partial {
            offset: last_start(data, first, data.len()),
        },
    }
}

fn find_end(haystack: &[u8]) -> Option<usize> {
    if haystack.len() < END.len() {
        return None;
    }
    haystack.windows(END.len()).position(|window| window == END)
}

fn last_start(data: &[u8], mut from: usize, limit: usize) -> usize {
    loop {
        match data[from + 1..limit].iter().position(|&byte| is_start(byte)) {
            Some(next) => from = from + 1 + next,
            None => return from,
        }
    }
}
