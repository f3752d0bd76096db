//! Fakes and scaffold blocks shared by the engine and block tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::engine::registry::BlockDescription;
use crate::engine::Registry;
use crate::errors::{BlockError, BlockResult};
use crate::message::Message;
use crate::traits::{
    read_config, Block, BlockConfig, Consumer, InitContext, MessagePort, Module, ModuleResult,
    PortLookup, Producer, Runnable,
};

/// Records everything dispatched through it.
pub struct FakePort {
    name: String,
    messages: Mutex<Vec<Message>>,
}

impl FakePort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.payload().to_vec())
            .collect()
    }
}

impl MessagePort for FakePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }
}

/// Port lookup over a fixed set of fake ports, ignoring the block name.
pub struct FakeLookup {
    ports: HashMap<String, Arc<FakePort>>,
}

impl FakeLookup {
    pub fn with_ports(names: &[&str]) -> Self {
        let ports = names
            .iter()
            .map(|name| (name.to_string(), Arc::new(FakePort::new(*name))))
            .collect();
        Self { ports }
    }

    pub fn port(&self, name: &str) -> &FakePort {
        self.ports.get(name).expect("unknown fake port")
    }
}

impl PortLookup for FakeLookup {
    fn output_port(&self, _block: &str, port: &str) -> Option<Arc<dyn MessagePort>> {
        self.ports
            .get(port)
            .map(|port| Arc::clone(port) as Arc<dyn MessagePort>)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectorConfig {
    #[serde(default)]
    fail_init: bool,
}

/// Pure consumer that stores every payload it sees.
pub struct CollectorBlock {
    name: String,
    messages: Mutex<Vec<Message>>,
    arrived: Notify,
    fail_remaining: AtomicUsize,
}

impl CollectorBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(Vec::new()),
            arrived: Notify::new(),
            fail_remaining: AtomicUsize::new(0),
        }
    }

    /// A collector whose first `failures` consumes return an error.
    pub fn failing_first(name: impl Into<String>, failures: usize) -> Self {
        let collector = Self::new(name);
        collector.fail_remaining.store(failures, Ordering::SeqCst);
        collector
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.payload().to_vec())
            .collect()
    }

    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.arrived.notified();
            if self.messages.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Block for CollectorBlock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &BlockConfig, _ctx: &InitContext<'_>) -> BlockResult<()> {
        let config: CollectorConfig = if config.is_null() {
            CollectorConfig::default()
        } else {
            read_config(config)?
        };
        if config.fail_init {
            return Err(BlockError::InvalidConfig(
                "collector was told to fail".to_string(),
            ));
        }
        Ok(())
    }

    fn as_consumer(&self) -> Option<&dyn Consumer> {
        Some(self)
    }
}

#[async_trait]
impl Consumer for CollectorBlock {
    async fn consume(&self, message: Message) -> BlockResult<()> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            return Err(BlockError::Runtime("scripted failure".to_string()));
        }
        self.messages.lock().unwrap().push(message);
        self.arrived.notify_waiters();
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EmitterConfig {
    #[serde(default = "default_ports")]
    ports: Vec<String>,
    #[serde(default)]
    emit: Vec<String>,
}

fn default_ports() -> Vec<String> {
    vec!["default".to_string()]
}

struct EmitterState {
    output: Option<Arc<dyn MessagePort>>,
    emit: Vec<String>,
}

/// Source that emits a configured list of messages on its first port, then
/// idles until shutdown.
pub struct EmitterBlock {
    name: String,
    state: tokio::sync::Mutex<Option<EmitterState>>,
}

impl EmitterBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl Block for EmitterBlock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &BlockConfig, ctx: &InitContext<'_>) -> BlockResult<()> {
        let config: EmitterConfig = read_config(config).unwrap_or(EmitterConfig {
            ports: default_ports(),
            emit: Vec::new(),
        });
        let output = match config.ports.first() {
            Some(port) => Some(ctx.output_port(port)?),
            None => None,
        };
        *self.state.lock().await = Some(EmitterState {
            output,
            emit: config.emit,
        });
        Ok(())
    }

    fn as_producer(&self) -> Option<&dyn Producer> {
        Some(self)
    }

    fn as_runnable(&self) -> Option<&dyn Runnable> {
        Some(self)
    }
}

impl Producer for EmitterBlock {
    fn ports(&self, config: &BlockConfig) -> BlockResult<Vec<String>> {
        if config.is_null() {
            return Ok(default_ports());
        }
        let config: EmitterConfig = read_config(config)?;
        Ok(config.ports)
    }
}

#[async_trait]
impl Runnable for EmitterBlock {
    async fn run(&self, shutdown: CancellationToken) -> BlockResult<()> {
        let (output, emit) = {
            let mut guard = self.state.lock().await;
            let state = guard
                .as_mut()
                .ok_or_else(|| BlockError::Runtime("emitter used before initialize".to_string()))?;
            (state.output.clone(), std::mem::take(&mut state.emit))
        };

        if let Some(output) = output {
            for payload in emit {
                output.dispatch(Message::new(payload.into_bytes()));
            }
        }

        shutdown.cancelled().await;
        Ok(())
    }
}

struct PassthroughState {
    output: Arc<dyn MessagePort>,
}

/// Fiber forwarding every message to its own `default` port unchanged.
pub struct PassthroughBlock {
    name: String,
    state: tokio::sync::Mutex<Option<PassthroughState>>,
}

impl PassthroughBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl Block for PassthroughBlock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &BlockConfig, ctx: &InitContext<'_>) -> BlockResult<()> {
        let output = ctx.output_port("default")?;
        *self.state.lock().await = Some(PassthroughState { output });
        Ok(())
    }

    fn as_producer(&self) -> Option<&dyn Producer> {
        Some(self)
    }

    fn as_consumer(&self) -> Option<&dyn Consumer> {
        Some(self)
    }
}

impl Producer for PassthroughBlock {
    fn ports(&self, _config: &BlockConfig) -> BlockResult<Vec<String>> {
        Ok(default_ports())
    }
}

#[async_trait]
impl Consumer for PassthroughBlock {
    async fn consume(&self, message: Message) -> BlockResult<()> {
        let guard = self.state.lock().await;
        if let Some(state) = guard.as_ref() {
            state.output.dispatch(message);
        }
        Ok(())
    }
}

struct TestingModule;

impl Module for TestingModule {
    fn name(&self) -> &str {
        "testing"
    }

    fn register_blocks(&self, registry: &mut Registry) -> ModuleResult {
        registry.register(BlockDescription::new("collector", |name| {
            Arc::new(CollectorBlock::new(name))
        }));
        registry.register(BlockDescription::new("emitter", |name| {
            Arc::new(EmitterBlock::new(name))
        }));
        registry.register(BlockDescription::new("passthrough", |name| {
            Arc::new(PassthroughBlock::new(name))
        }));
        Ok(())
    }
}

/// The module every engine test installs.
pub fn testing_module() -> Box<dyn Module> {
    Box::new(TestingModule)
}
