use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::engine::registry::BlockDescription;
use crate::errors::{BlockError, BlockResult};
use crate::message::Message;
use crate::traits::{
    read_config, Block, BlockConfig, Consumer, InitContext, MessagePort, Producer,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouterConfig {
    routes: Vec<RouterRoute>,
    #[serde(default)]
    fallback: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouterRoute {
    port: String,
    patterns: Vec<String>,
}

/// Why the routing trie could not be built.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrieError {
    #[error("pattern shall not be empty")]
    EmptyPattern,

    #[error("pattern '{pattern}' is already used by port '{port}'")]
    PatternConflict { pattern: String, port: String },

    #[error("pattern '{0}' is a prefix of another pattern")]
    PrefixConflict(String),

    #[error("no route defined")]
    NoRoute,
}

impl From<TrieError> for BlockError {
    fn from(error: TrieError) -> Self {
        BlockError::InvalidConfig(error.to_string())
    }
}

/// Routes each message to one output port chosen by a byte-prefix match.
///
/// A fiber: the inbound message is matched against a deterministic trie
/// built from the configured patterns and re-emitted unchanged on the
/// matching port, on the fallback port when nothing matches, or dropped
/// when no fallback is configured.
pub struct NmeaRouter {
    name: String,
    state: Mutex<Option<RouterState>>,
}

struct RouterState {
    root: Node,
    fallback: Option<Arc<dyn MessagePort>>,
}

impl NmeaRouter {
    pub const CLASS_NAME: &'static str = "nmea-router";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(None),
        }
    }

    pub fn description() -> BlockDescription {
        BlockDescription::new(Self::CLASS_NAME, |name| Arc::new(NmeaRouter::new(name)))
    }

    /// Collect pattern → port, rejecting empty patterns and one pattern
    /// claimed by two ports. The ordered map makes the trie deterministic
    /// for a given pattern set.
    fn collect_patterns(config: &RouterConfig) -> Result<BTreeMap<Vec<u8>, String>, TrieError> {
        let mut patterns: BTreeMap<Vec<u8>, String> = BTreeMap::new();

        for route in &config.routes {
            for pattern in &route.patterns {
                if pattern.is_empty() {
                    return Err(TrieError::EmptyPattern);
                }
                match patterns.get(pattern.as_bytes()) {
                    None => {
                        patterns.insert(pattern.clone().into_bytes(), route.port.clone());
                    }
                    Some(existing) if existing == &route.port => {}
                    Some(existing) => {
                        return Err(TrieError::PatternConflict {
                            pattern: pattern.clone(),
                            port: existing.clone(),
                        });
                    }
                }
            }
        }

        if patterns.is_empty() {
            return Err(TrieError::NoRoute);
        }

        Ok(patterns)
    }
}

#[async_trait]
impl Block for NmeaRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &BlockConfig, ctx: &InitContext<'_>) -> BlockResult<()> {
        let config: RouterConfig = read_config(config)?;
        let patterns = Self::collect_patterns(&config)?;

        let mut root: Option<Node> = None;
        for (pattern, port_name) in &patterns {
            let port = ctx.output_port(port_name)?;
            match &mut root {
                None => root = Some(Node::new(pattern, port)?),
                Some(node) => {
                    node.extend(pattern, port).map_err(|error| match error {
                        TrieError::PrefixConflict(_) => TrieError::PrefixConflict(
                            String::from_utf8_lossy(pattern).into_owned(),
                        ),
                        other => other,
                    })?;
                }
            }
        }
        let Some(root) = root else {
            return Err(TrieError::NoRoute.into());
        };

        let fallback = match &config.fallback {
            Some(name) => Some(ctx.output_port(name)?),
            None => None,
        };

        *self.state.lock().await = Some(RouterState { root, fallback });
        Ok(())
    }

    fn as_producer(&self) -> Option<&dyn Producer> {
        Some(self)
    }

    fn as_consumer(&self) -> Option<&dyn Consumer> {
        Some(self)
    }
}

impl Producer for NmeaRouter {
    /// Fallback first (when configured), then every distinct route port in
    /// first-seen order. Routes without patterns declare nothing.
    fn ports(&self, config: &BlockConfig) -> BlockResult<Vec<String>> {
        let config: RouterConfig = read_config(config)?;

        if config.routes.is_empty() {
            return Err(TrieError::NoRoute.into());
        }

        let mut result: Vec<String> = Vec::new();
        if let Some(fallback) = &config.fallback {
            result.push(fallback.clone());
        }
        for route in &config.routes {
            if !route.patterns.is_empty() && !result.contains(&route.port) {
                result.push(route.port.clone());
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl Consumer for NmeaRouter {
    async fn consume(&self, message: Message) -> BlockResult<()> {
        let guard = self.state.lock().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| BlockError::Runtime("router used before initialize".to_string()))?;

        let port = state
            .root
            .matches(message.payload())
            .or(state.fallback.as_ref());
        // No match and no fallback: the message is dropped.
        if let Some(port) = port {
            port.dispatch(message);
        }
        Ok(())
    }
}

/// One trie node: match `byte` and continue in `next`, or try the sibling
/// chain in `fallback`. A node with a port is terminal; patterns are
/// prefix-free, so terminals never continue.
struct Node {
    byte: u8,
    next: Option<Box<Node>>,
    fallback: Option<Box<Node>>,
    port: Option<Arc<dyn MessagePort>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("byte", &self.byte)
            .field("next", &self.next)
            .field("fallback", &self.fallback)
            .field("port", &self.port.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

impl Node {
    fn new(pattern: &[u8], port: Arc<dyn MessagePort>) -> Result<Self, TrieError> {
        match pattern {
            [] => Err(TrieError::EmptyPattern),
            [byte] => Ok(Node {
                byte: *byte,
                next: None,
                fallback: None,
                port: Some(port),
            }),
            [byte, rest @ ..] => Ok(Node {
                byte: *byte,
                next: Some(Box::new(Node::new(rest, port)?)),
                fallback: None,
                port: None,
            }),
        }
    }

    fn extend(&mut self, pattern: &[u8], port: Arc<dyn MessagePort>) -> Result<(), TrieError> {
        let Some((&byte, rest)) = pattern.split_first() else {
            return Err(TrieError::EmptyPattern);
        };

        if byte != self.byte {
            return match &mut self.fallback {
                Some(sibling) => sibling.extend(pattern, port),
                None => {
                    self.fallback = Some(Box::new(Node::new(pattern, port)?));
                    Ok(())
                }
            };
        }

        // The matched prefix reached a terminal: the existing pattern is a
        // prefix of the new one.
        if self.port.is_some() {
            return Err(TrieError::PrefixConflict(String::new()));
        }
        // The new pattern stops here: it is a prefix of an existing one.
        if rest.is_empty() {
            return Err(TrieError::PrefixConflict(String::new()));
        }

        match &mut self.next {
            Some(next) => next.extend(rest, port),
            None => Err(TrieError::PrefixConflict(String::new())),
        }
    }

    fn matches(&self, data: &[u8]) -> Option<&Arc<dyn MessagePort>> {
        let (&byte, rest) = data.split_first()?;

        if byte == self.byte {
            match &self.next {
                Some(next) => next.matches(rest),
                None => self.port.as_ref(),
            }
        } else {
            self.fallback.as_ref().and_then(|sibling| sibling.matches(data))
        }
    }
}
