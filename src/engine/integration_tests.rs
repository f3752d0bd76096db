//! Whole-engine scenarios: a configured graph is built, run, fed, and shut
//! down through the public manager surface only.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::blocks::builtin_modules;
use crate::config::EngineConfig;
use crate::engine::mailbox::Mailbox;
use crate::engine::registry::BlockDescription;
use crate::engine::{Manager, Registry};
use crate::errors::BlockResult;
use crate::message::Message;
use crate::traits::{
    Block, BlockConfig, Consumer, InitContext, MessagePort, Module, ModuleResult, Producer,
    Runnable,
};

/// Shared view into what a recording sink has processed.
#[derive(Default)]
struct SinkStore {
    messages: Mutex<Vec<Vec<u8>>>,
    arrived: Notify,
}

impl SinkStore {
    fn push(&self, message: &Message) {
        self.messages.lock().unwrap().push(message.payload().to_vec());
        self.arrived.notify_waiters();
    }

    fn payloads(&self) -> Vec<Vec<u8>> {
        self.messages.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.arrived.notified();
            if self.messages.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

/// Sink block writing everything it processes into a [`SinkStore`].
struct RecordingSink {
    name: String,
    mailbox: Mailbox,
    store: Arc<SinkStore>,
}

#[async_trait]
impl Block for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &BlockConfig, _ctx: &InitContext<'_>) -> BlockResult<()> {
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
impl Consumer for RecordingSink {
    async fn consume(&self, message: Message) -> BlockResult<()> {
        self.mailbox.push(message);
        Ok(())
    }
}

#[async_trait]
impl Runnable for RecordingSink {
    async fn run(&self, shutdown: CancellationToken) -> BlockResult<()> {
        while let Some(message) = self.mailbox.next(&shutdown).await {
            self.store.push(&message);
        }
        Ok(())
    }
}

/// Source block replaying a fixed chunk list, then idling until shutdown.
struct ChunkSource {
    name: String,
    chunks: Vec<Vec<u8>>,
    output: tokio::sync::Mutex<Option<Arc<dyn MessagePort>>>,
}

#[async_trait]
impl Block for ChunkSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &BlockConfig, ctx: &InitContext<'_>) -> BlockResult<()> {
        *self.output.lock().await = Some(ctx.output_port("default")?);
        Ok(())
    }

    fn as_producer(&self) -> Option<&dyn Producer> {
        Some(self)
    }

    fn as_runnable(&self) -> Option<&dyn Runnable> {
        Some(self)
    }
}

impl Producer for ChunkSource {
    fn ports(&self, _config: &BlockConfig) -> BlockResult<Vec<String>> {
        Ok(vec!["default".to_string()])
    }
}

#[async_trait]
impl Runnable for ChunkSource {
    async fn run(&self, shutdown: CancellationToken) -> BlockResult<()> {
        if let Some(output) = self.output.lock().await.as_ref() {
            for chunk in &self.chunks {
                output.dispatch(Message::copy_from_slice(chunk));
            }
        }
        shutdown.cancelled().await;
        Ok(())
    }
}

/// Module registering scenario-specific descriptions next to the built-in
/// ones.
struct ScenarioModule {
    descriptions: Vec<BlockDescription>,
}

impl Module for ScenarioModule {
    fn name(&self) -> &str {
        "scenario"
    }

    fn register_blocks(&self, registry: &mut Registry) -> ModuleResult {
        for description in &self.descriptions {
            registry.register(description.clone());
        }
        Ok(())
    }
}

fn chunk_source_description(chunks: Vec<Vec<u8>>) -> BlockDescription {
    BlockDescription::new("chunk-source", move |name| {
        Arc::new(ChunkSource {
            name: name.to_string(),
            chunks: chunks.clone(),
            output: tokio::sync::Mutex::new(None),
        })
    })
}

fn recording_sink_description(class: &str, store: Arc<SinkStore>) -> BlockDescription {
    BlockDescription::new(class, move |name| {
        Arc::new(RecordingSink {
            name: name.to_string(),
            mailbox: Mailbox::new(),
            store: Arc::clone(&store),
        })
    })
}

async fn start_engine(
    descriptions: Vec<BlockDescription>,
    config: serde_json::Value,
) -> (crate::engine::ShutdownHandle, tokio::task::JoinHandle<()>) {
    let config: EngineConfig = serde_json::from_value(config).expect("valid document");
    let mut manager = Manager::new();
    for module in builtin_modules() {
        manager.add_module(module);
    }
    manager.add_module(Box::new(ScenarioModule { descriptions }));
    manager.initialize(&config).await.expect("graph builds");

    let handle = manager.shutdown_handle();
    let runner = tokio::spawn(async move { manager.run().await });
    (handle, runner)
}

#[tokio::test]
async fn framed_stream_arrives_in_source_order() {
    let sentences: Vec<&[u8]> = vec![
        b"$SDDBT,38.0,f,11.6,M,06.3,F*3E\r\n",
        b"$HCHDG,331.3,00.0,E,00.0,E*40\r\n",
        b"!AIVDM,1,1,,A,18vAfjo1hvwqN6PJHD8jHQrT050l,0*08\r\n",
        b"$GPGGA,164517.59,4601.47709,N,00114.10553,W,1,05*61\r\n",
        b"$WIMWV,025.0,R,016.3,N,A*20\r\n",
    ];
    let stream: Vec<u8> = sentences.concat();
    let chunks: Vec<Vec<u8>> = stream.chunks(20).map(<[u8]>::to_vec).collect();

    let store = Arc::new(SinkStore::default());
    let (handle, runner) = start_engine(
        vec![
            chunk_source_description(chunks),
            recording_sink_description("recording-sink", Arc::clone(&store)),
        ],
        json!({
            "blocks": [
                { "name": "feed", "className": "chunk-source", "config": {} },
                { "name": "frames", "className": "nmea-framer", "config": {} },
                { "name": "record", "className": "recording-sink", "config": {} }
            ],
            "routes": [
                { "sources": ["feed"], "destinations": ["frames"] },
                { "name": "framed", "dispatcher": "framed",
                  "sources": ["frames.default"], "destinations": ["record"] }
            ]
        }),
    )
    .await;

    tokio::time::timeout(Duration::from_secs(2), store.wait_for(sentences.len()))
        .await
        .expect("every sentence reaches the sink");
    handle.shutdown();
    runner.await.unwrap();

    let expected: Vec<Vec<u8>> = sentences.iter().map(|s| s.to_vec()).collect();
    assert_eq!(store.payloads(), expected);
}

#[tokio::test]
async fn framer_and_router_split_a_feed_by_talker() {
    let stream: Vec<u8> = [
        b"$GPGGA,164517.59*61\r\n".as_slice(),
        b"!AIVDM,1,1,,A*08\r\n".as_slice(),
        b"$GPGGA,164518.67*69\r\n".as_slice(),
        b"$HCHDG,331.3,00.0*40\r\n".as_slice(),
    ]
    .concat();
    let chunks: Vec<Vec<u8>> = stream.chunks(13).map(<[u8]>::to_vec).collect();

    let gps = Arc::new(SinkStore::default());
    let ais = Arc::new(SinkStore::default());
    let rest = Arc::new(SinkStore::default());
    let (handle, runner) = start_engine(
        vec![
            chunk_source_description(chunks),
            recording_sink_description("gps-sink", Arc::clone(&gps)),
            recording_sink_description("ais-sink", Arc::clone(&ais)),
            recording_sink_description("rest-sink", Arc::clone(&rest)),
        ],
        json!({
            "blocks": [
                { "name": "feed", "className": "chunk-source", "config": {} },
                { "name": "frames", "className": "nmea-framer", "config": {} },
                { "name": "split", "className": "nmea-router", "config": {
                    "routes": [
                        { "port": "gps", "patterns": ["$GPGGA"] },
                        { "port": "ais", "patterns": ["!AIVDM"] }
                    ],
                    "fallback": "other"
                } },
                { "name": "gps-log", "className": "gps-sink", "config": {} },
                { "name": "ais-log", "className": "ais-sink", "config": {} },
                { "name": "other-log", "className": "rest-sink", "config": {} }
            ],
            "routes": [
                { "sources": ["feed"], "destinations": ["frames"] },
                { "sources": ["frames"], "destinations": ["split"] },
                { "sources": ["split.gps"], "destinations": ["gps-log"] },
                { "sources": ["split.ais"], "destinations": ["ais-log"] },
                { "sources": ["split.other"], "destinations": ["other-log"] }
            ]
        }),
    )
    .await;

    let all_arrived = async {
        gps.wait_for(2).await;
        ais.wait_for(1).await;
        rest.wait_for(1).await;
    };
    tokio::time::timeout(Duration::from_secs(2), all_arrived)
        .await
        .expect("every sentence reaches its sink");
    handle.shutdown();
    runner.await.unwrap();

    assert_eq!(
        gps.payloads(),
        vec![
            b"$GPGGA,164517.59*61\r\n".to_vec(),
            b"$GPGGA,164518.67*69\r\n".to_vec(),
        ]
    );
    assert_eq!(ais.payloads(), vec![b"!AIVDM,1,1,,A*08\r\n".to_vec()]);
    assert_eq!(rest.payloads(), vec![b"$HCHDG,331.3,00.0*40\r\n".to_vec()]);
}

#[tokio::test]
async fn one_port_fans_out_to_every_attached_route() {
    let first = Arc::new(SinkStore::default());
    let second = Arc::new(SinkStore::default());
    let (handle, runner) = start_engine(
        vec![
            chunk_source_description(vec![b"payload".to_vec()]),
            recording_sink_description("first-sink", Arc::clone(&first)),
            recording_sink_description("second-sink", Arc::clone(&second)),
        ],
        json!({
            "blocks": [
                { "name": "feed", "className": "chunk-source", "config": {} },
                { "name": "one", "className": "first-sink", "config": {} },
                { "name": "two", "className": "second-sink", "config": {} }
            ],
            "routes": [
                { "sources": ["feed"], "destinations": ["one"] },
                { "dispatcher": "second", "sources": ["feed"], "destinations": ["two"] }
            ]
        }),
    )
    .await;

    let both = async {
        first.wait_for(1).await;
        second.wait_for(1).await;
    };
    tokio::time::timeout(Duration::from_secs(2), both)
        .await
        .expect("both routes deliver");
    handle.shutdown();
    runner.await.unwrap();

    assert_eq!(first.payloads(), vec![b"payload".to_vec()]);
    assert_eq!(second.payloads(), vec![b"payload".to_vec()]);
}
