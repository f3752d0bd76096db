use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::engine::registry::BlockDescription;
use crate::errors::{BlockError, BlockResult};
use crate::message::Message;
use crate::traits::{
    read_config, Block, BlockConfig, Consumer, InitContext, MessagePort, Producer,
};

pub(crate) const OUTPUT_PORT: &str = "default";
const DEFAULT_BUFFER_SIZE: usize = 1024;

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

/// Configuration of a framer block. The start and end sequences are given
/// in source form and may contain the usual two-character escape sequences
/// (`\r`, `\n`, `\0`, ...).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FramerConfig {
    start: String,
    end: String,
    #[serde(default = "default_buffer_size")]
    buffer_size: usize,
}

/// Extracts variable-length frames bounded by configurable start and end
/// byte sequences from a chunked stream of messages.
///
/// A fiber: frames are cut on the dispatcher task that delivered the chunk
/// and emitted on the sole output port `"default"`. Bytes that cannot be
/// part of a frame are dropped with a warning; a partial frame tail is
/// buffered up to `bufferSize` bytes and completed by later chunks.
pub struct Framer {
    name: String,
    state: Mutex<Option<FramerState>>,
}

impl Framer {
    pub const CLASS_NAME: &'static str = "framer";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(None),
        }
    }

    pub fn description() -> BlockDescription {
        BlockDescription::new(Self::CLASS_NAME, |name| Arc::new(Framer::new(name)))
    }
}

#[async_trait]
impl Block for Framer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &BlockConfig, ctx: &InitContext<'_>) -> BlockResult<()> {
        let config: FramerConfig = read_config(config)?;
        let start = unescape(&config.start);
        let end = unescape(&config.end);

        if start.is_empty() {
            return Err(BlockError::InvalidConfig(
                "start sequence shall not be empty".to_string(),
            ));
        }
        if end.is_empty() {
            return Err(BlockError::InvalidConfig(
                "end sequence shall not be empty".to_string(),
            ));
        }
        if config.buffer_size == 0 {
            return Err(BlockError::InvalidConfig(
                "bufferSize shall be at least 1".to_string(),
            ));
        }

        let output = ctx.output_port(OUTPUT_PORT)?;
        *self.state.lock().await = Some(FramerState {
            start,
            end,
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

impl Producer for Framer {
    fn ports(&self, _config: &BlockConfig) -> BlockResult<Vec<String>> {
        Ok(vec![OUTPUT_PORT.to_string()])
    }
}

#[async_trait]
impl Consumer for Framer {
    async fn consume(&self, message: Message) -> BlockResult<()> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| BlockError::Runtime("framer used before initialize".to_string()))?;
        state.consume(&self.name, message.payload());
        Ok(())
    }
}

struct FramerState {
    start: Vec<u8>,
    end: Vec<u8>,
    output: Arc<dyn MessagePort>,
    buffer: Vec<u8>,
    capacity: usize,
}

impl FramerState {
    fn consume(&mut self, name: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        // An empty buffer means frames can be cut from the message in
        // place; only the unframed tail is copied.
        if self.buffer.is_empty() {
            self.scan_message(name, data);
            return;
        }

        self.append(name, data);

        if self.buffer.len() >= self.start.len() + self.end.len() {
            self.scan_buffer(name);
        }
    }

    fn scan_message(&mut self, name: &str, data: &[u8]) {
        let mut begin = 0usize;

        while begin < data.len() {
            match find_frame(&data[begin..], &self.start, &self.end) {
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
                    // An oversized tail loses its oldest bytes; only the
                    // last capacity bytes can ever complete a frame.
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
                    let mut left = data.len() - begin;
                    // The last start-1 bytes may begin a start sequence
                    // completed by the next message.
                    if self.start.len() > 1 && left > 0 {
                        let saved = left.min(self.start.len() - 1);
                        self.buffer.extend_from_slice(&data[data.len() - saved..]);
                        left -= saved;
                    }
                    if left > 0 {
                        tracing::warn!("{}: {} bytes skipped", name, left);
                    }
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
            // The message alone fills the buffer: everything buffered and
            // the head of the message are lost.
            let skipped = self.buffer.len() + data.len() - self.capacity;
            tracing::warn!("{}: {} bytes skipped", name, skipped);
            self.buffer.clear();
            self.buffer
                .extend_from_slice(&data[data.len() - self.capacity..]);
        } else {
            // Drop the oldest buffered bytes to make room for the message.
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
            match find_frame(&self.buffer[begin..total], &self.start, &self.end) {
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
                    let mut left = total - begin;
                    if self.start.len() > 1 && left > 0 {
                        let saved = left.min(self.start.len() - 1);
                        keep = total - saved..total;
                        left -= saved;
                    }
                    if left > 0 {
                        tracing::warn!("{}: {} bytes skipped", name, left);
                    }
                    break;
                }
            }
        }

        self.buffer.copy_within(keep.clone(), 0);
        self.buffer.truncate(keep.len());
    }
}

/// Result of one scan for a frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameScan {
    /// A complete frame: `offset` from the scan origin, `len` bytes
    /// including both delimiter sequences.
    Frame { offset: usize, len: usize },
    /// A start sequence without its end; a later chunk may complete it.
    Partial { offset: usize },
    /// No start sequence at all.
    Nothing,
}

/// Locate the first complete frame in `data`.
///
/// When an end sequence exists, the frame begins at the *last* start
/// sequence preceding it, so an unterminated prefix like
/// `"$GPGGA,...$GPGSV,...*6c\r\n"` yields the later, complete frame. The
/// same adjustment applies to a lone start sequence.
pub(crate) fn find_frame(data: &[u8], start: &[u8], end: &[u8]) -> FrameScan {
    let Some(first) = find_subslice(data, start) else {
        return FrameScan::Nothing;
    };

    if first + start.len() >= data.len() {
        return FrameScan::Partial { offset: first };
    }

    match find_subslice(&data[first + start.len()..], end) {
        Some(relative) => {
            let end_at = first + start.len() + relative;
            let offset = last_start(data, start, first, end_at);
            FrameScan::Frame {
                offset,
                len: end_at - offset + end.len(),
            }
        }
        None => FrameScan::Partial {
            offset: last_start(data, start, first, data.len()),
        },
    }
}

/// Advance `from` to the last occurrence of `start` before `limit`.
fn last_start(data: &[u8], start: &[u8], mut from: usize, limit: usize) -> usize {
    loop {
        match find_subslice(&data[from + start.len()..limit], start) {
            Some(next) => from = from + start.len() + next,
            None => return from,
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Replace the two-character escape sequences `\a \b \f \n \r \t \v \0 \\
/// \' \"` with their single-byte values; anything else passes through.
pub(crate) fn unescape(source: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.len());
    let mut bytes = source.bytes();

    while let Some(byte) = bytes.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(b'a') => out.push(0x07),
            Some(b'b') => out.push(0x08),
            Some(b'f') => out.push(0x0c),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'v') => out.push(0x0b),
            Some(b'0') => out.push(0x00),
            Some(b'\\') => out.push(b'\\'),
            Some(b'\'') => out.push(b'\''),
            Some(b'"') => out.push(b'"'),
            Some(other) => {
                out.push(b'\\');
                out.push(other);
            }
            None => out.push(b'\\'),
        }
    }

    out
}
