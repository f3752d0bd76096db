use std::sync::Arc;

use crate::engine::route::Route;
use crate::message::Message;
use crate::traits::MessagePort;

/// An output endpoint of a block, identified by (owning block, port name).
///
/// Routes are attached while the manager builds the graph; the list is
/// frozen before any message flows, so dispatching needs no locking.
pub struct Port {
    block: String,
    name: String,
    label: Arc<str>,
    routes: Vec<Arc<Route>>,
}

impl Port {
    pub fn new(block: impl Into<String>, name: impl Into<String>) -> Self {
        let block = block.into();
        let name = name.into();
        let label = Arc::from(format!("{}.{}", block, name).as_str());
        Self {
            block,
            name,
            label,
            routes: Vec::new(),
        }
    }

    /// Name of the owning block.
    pub fn block(&self) -> &str {
        &self.block
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Attach a route, keeping insertion order and ignoring a route that is
    /// already attached.
    pub fn attach(&mut self, route: &Arc<Route>) {
        if !self.routes.iter().any(|known| Arc::ptr_eq(known, route)) {
            self.routes.push(Arc::clone(route));
        }
    }
}

impl MessagePort for Port {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self, message: Message) {
        for route in &self.routes {
            Route::dispatch(route, message.clone(), &self.label);
        }
    }
}
