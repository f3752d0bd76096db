use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{is_valid_name, EngineConfig, RouteEntry};
use crate::engine::dispatcher::Dispatcher;
use crate::engine::module_loader::ModuleLoader;
use crate::engine::port::Port;
use crate::engine::registry::Registry;
use crate::engine::route::Route;
use crate::errors::{GraphError, GraphResult};
use crate::traits::{Block, InitContext, MessagePort, Module, PortLookup};

type PortKey = (String, String);

/// Cloneable handle that requests engine shutdown.
///
/// Cancelling is idempotent, so wiring it to repeated OS signals is safe.
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Owns the whole graph: blocks, ports, routes, and dispatchers.
///
/// `initialize` builds and validates everything; nothing is created after
/// it returns. `run` drives every dispatcher and every runnable block on
/// its own task and returns once all of them have finished, which happens
/// after [`Manager::shutdown`] (or a [`ShutdownHandle`]) cancels the shared
/// token.
pub struct Manager {
    registry: Registry,
    loader: ModuleLoader,
    blocks: HashMap<String, Arc<dyn Block>>,
    block_order: Vec<String>,
    ports: HashMap<PortKey, Arc<Port>>,
    routes: Vec<Arc<Route>>,
    dispatchers: HashMap<String, Arc<Dispatcher>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("block_order", &self.block_order)
            .finish_non_exhaustive()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            loader: ModuleLoader::new(),
            blocks: HashMap::new(),
            block_order: Vec::new(),
            ports: HashMap::new(),
            routes: Vec::new(),
            dispatchers: HashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a built-in module before `initialize`.
    pub fn add_module(&mut self, module: Box<dyn Module>) {
        self.loader.add_module(module);
    }

    /// Build the graph: load modules, create blocks and their ports,
    /// create routes and dispatchers, then initialize every block in
    /// configuration order. Any error aborts; no partial graph runs.
    pub async fn initialize(&mut self, config: &EngineConfig) -> GraphResult<()> {
        self.loader
            .load(&mut self.registry, &config.additional_package_folders)?;

        let mut ports = self.create_blocks(config)?;
        self.create_routes(config, &mut ports)?;
        self.ports = ports
            .into_iter()
            .map(|(key, port)| (key, Arc::new(port)))
            .collect();

        self.initialize_blocks(config).await
    }

    /// Drive all runnables until every one of them has terminated, then
    /// tear the graph down.
    pub async fn run(&mut self) {
        let mut workers: JoinSet<()> = JoinSet::new();

        for dispatcher in self.dispatchers.values() {
            let dispatcher = Arc::clone(dispatcher);
            let token = self.shutdown.clone();
            workers.spawn(async move {
                dispatcher.run(token).await;
                tracing::info!(dispatcher = %dispatcher.name(), "dispatcher terminated");
            });
        }

        for name in &self.block_order {
            let Some(block) = self.blocks.get(name) else {
                continue;
            };
            if block.as_runnable().is_none() {
                continue;
            }
            let block = Arc::clone(block);
            let token = self.shutdown.clone();
            workers.spawn(async move {
                let outcome = match block.as_runnable() {
                    Some(runnable) => runnable.run(token).await,
                    None => Ok(()),
                };
                match outcome {
                    Ok(()) => tracing::info!(block = %block.name(), "block terminated"),
                    Err(error) => {
                        tracing::error!(block = %block.name(), %error, "block terminated with error")
                    }
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "worker task failed");
            }
        }

        self.blocks.clear();
        self.block_order.clear();
        self.ports.clear();
        self.routes.clear();
        self.dispatchers.clear();
    }

    /// Request orderly termination of every block and dispatcher.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Find a block by name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Block>> {
        self.blocks.get(name).cloned()
    }

    /// Find a port by owning block and port name.
    pub fn find_port(&self, block: &str, port: &str) -> GraphResult<Arc<Port>> {
        self.ports
            .get(&(block.to_string(), port.to_string()))
            .cloned()
            .ok_or_else(|| GraphError::UnknownPort {
                route: block.to_string(),
                port: port.to_string(),
            })
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn dispatcher_names(&self) -> Vec<&str> {
        self.dispatchers.keys().map(String::as_str).collect()
    }

    fn create_blocks(&mut self, config: &EngineConfig) -> GraphResult<HashMap<PortKey, Port>> {
        let mut ports = HashMap::new();

        for entry in &config.blocks {
            if !is_valid_name(&entry.name) {
                return Err(GraphError::InvalidName(entry.name.clone()));
            }
            if self.blocks.contains_key(&entry.name) {
                return Err(GraphError::DuplicateBlock(entry.name.clone()));
            }

            let block = self.registry.find(&entry.class_name)?.instantiate(&entry.name);

            if let Some(producer) = block.as_producer() {
                let declared =
                    producer
                        .ports(&entry.config)
                        .map_err(|source| GraphError::BlockInit {
                            block: entry.name.clone(),
                            source,
                        })?;

                for port_name in declared {
                    if !is_valid_name(&port_name) {
                        return Err(GraphError::InvalidName(port_name));
                    }
                    let key = (entry.name.clone(), port_name);
                    if ports.contains_key(&key) {
                        return Err(GraphError::DuplicatePort {
                            block: key.0,
                            port: key.1,
                        });
                    }
                    let port = Port::new(&key.0, &key.1);
                    ports.insert(key, port);
                }
            }

            self.blocks.insert(entry.name.clone(), block);
            self.block_order.push(entry.name.clone());
        }

        Ok(ports)
    }

    fn create_routes(
        &mut self,
        config: &EngineConfig,
        ports: &mut HashMap<PortKey, Port>,
    ) -> GraphResult<()> {
        for (index, entry) in config.routes.iter().enumerate() {
            let label = route_label(entry, index);

            if let Some(name) = &entry.name {
                if !is_valid_name(name) {
                    return Err(GraphError::InvalidName(name.clone()));
                }
                if self.routes.iter().any(|route| route.name() == Some(name.as_str())) {
                    return Err(GraphError::DuplicateRoute(name.clone()));
                }
            }

            if entry.sources.is_empty() || entry.destinations.is_empty() {
                return Err(GraphError::EmptyRoute(label));
            }

            let source_keys = self.resolve_sources(entry, &label, ports)?;
            let destinations = self.resolve_destinations(entry, &label)?;

            let dispatcher_name = match &entry.dispatcher {
                None => Dispatcher::DEFAULT_NAME.to_string(),
                Some(name) if name == Dispatcher::DEFAULT_NAME => {
                    return Err(GraphError::ReservedDispatcher {
                        route: label,
                        name: name.clone(),
                    });
                }
                Some(name) => name.clone(),
            };
            let dispatcher = self
                .dispatchers
                .entry(dispatcher_name.clone())
                .or_insert_with(|| Arc::new(Dispatcher::new(dispatcher_name)))
                .clone();

            let route = Arc::new(Route::new(
                entry.name.clone(),
                entry.sources.clone(),
                destinations,
                dispatcher,
            ));
            for key in &source_keys {
                if let Some(port) = ports.get_mut(key) {
                    port.attach(&route);
                }
            }
            self.routes.push(route);
        }

        Ok(())
    }

    /// Resolve `block` / `block.port` source strings to port keys. The bare
    /// form is only unambiguous when the block owns exactly one port.
    fn resolve_sources(
        &self,
        entry: &RouteEntry,
        label: &str,
        ports: &HashMap<PortKey, Port>,
    ) -> GraphResult<Vec<PortKey>> {
        let mut keys = Vec::with_capacity(entry.sources.len());

        for source in &entry.sources {
            let (block_name, port_name) = match source.split_once('.') {
                Some((block, port)) => (block, Some(port)),
                None => (source.as_str(), None),
            };
            if block_name.is_empty() || port_name == Some("") {
                return Err(GraphError::InvalidName(source.clone()));
            }

            if !self.blocks.contains_key(block_name) {
                return Err(GraphError::UnknownBlock {
                    route: label.to_string(),
                    block: block_name.to_string(),
                });
            }

            let port_name = match port_name {
                Some(port) => port.to_string(),
                None => {
                    let mut owned = ports.keys().filter(|(owner, _)| owner == block_name);
                    let first = owned.next();
                    if owned.next().is_some() {
                        return Err(GraphError::AmbiguousPort {
                            route: label.to_string(),
                            block: block_name.to_string(),
                        });
                    }
                    match first {
                        Some((_, port)) => port.clone(),
                        None => {
                            return Err(GraphError::UnknownPort {
                                route: label.to_string(),
                                port: source.clone(),
                            });
                        }
                    }
                }
            };

            let key = (block_name.to_string(), port_name);
            if !ports.contains_key(&key) {
                return Err(GraphError::UnknownPort {
                    route: label.to_string(),
                    port: source.clone(),
                });
            }
            keys.push(key);
        }

        Ok(keys)
    }

    fn resolve_destinations(
        &self,
        entry: &RouteEntry,
        label: &str,
    ) -> GraphResult<Vec<Arc<dyn Block>>> {
        let mut destinations = Vec::with_capacity(entry.destinations.len());

        for name in &entry.destinations {
            let block = self
                .blocks
                .get(name)
                .ok_or_else(|| GraphError::UnknownBlock {
                    route: label.to_string(),
                    block: name.clone(),
                })?;
            if block.as_consumer().is_none() {
                return Err(GraphError::NotAConsumer {
                    route: label.to_string(),
                    block: name.clone(),
                });
            }
            destinations.push(Arc::clone(block));
        }

        Ok(destinations)
    }

    async fn initialize_blocks(&self, config: &EngineConfig) -> GraphResult<()> {
        for entry in &config.blocks {
            let Some(block) = self.blocks.get(&entry.name) else {
                continue;
            };
            let ctx = InitContext::new(&entry.name, self);
            block
                .initialize(&entry.config, &ctx)
                .await
                .map_err(|source| GraphError::BlockInit {
                    block: entry.name.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl PortLookup for Manager {
    fn output_port(&self, block: &str, port: &str) -> Option<Arc<dyn MessagePort>> {
        self.ports
            .get(&(block.to_string(), port.to_string()))
            .map(|port| Arc::clone(port) as Arc<dyn MessagePort>)
    }
}

fn route_label(entry: &RouteEntry, index: usize) -> String {
    entry
        .name
        .clone()
        .unwrap_or_else(|| format!("unnamed #{}", index + 1))
}
