use std::sync::Arc;

use crate::engine::dispatcher::{DispatchRequest, Dispatcher};
use crate::message::Message;
use crate::traits::Block;

/// A delivery relationship: messages emitted on any of the source ports are
/// queued on the route's dispatcher and handed to every destination block.
///
/// Routes never own their endpoints; the manager does. The source list is
/// retained as labels for diagnostics only; attachment to ports is what
/// makes a route live.
pub struct Route {
    name: Option<String>,
    sources: Vec<String>,
    destinations: Vec<Arc<dyn Block>>,
    dispatcher: Arc<Dispatcher>,
}

impl Route {
    pub fn new(
        name: Option<String>,
        sources: Vec<String>,
        destinations: Vec<Arc<dyn Block>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            name,
            sources,
            destinations,
            dispatcher,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn destinations(&self) -> &[Arc<dyn Block>] {
        &self.destinations
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Queue a message on the route's dispatcher for delivery to every
    /// destination. The request carries the route itself, so the caller
    /// hands in its shared handle.
    pub fn dispatch(route: &Arc<Route>, message: Message, source: &Arc<str>) {
        route.dispatcher.enqueue(DispatchRequest {
            message,
            source: Arc::clone(source),
            route: Arc::clone(route),
        });
    }
}
