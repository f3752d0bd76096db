use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{GraphError, GraphResult};
use crate::traits::Block;

/// Factory producing a block instance from its graph name.
pub type BlockFactory = Arc<dyn Fn(&str) -> Arc<dyn Block> + Send + Sync>;

/// A registered block class: the class name found in configuration plus
/// the factory that instantiates it.
#[derive(Clone)]
pub struct BlockDescription {
    class_name: String,
    create: BlockFactory,
}

impl BlockDescription {
    pub fn new(
        class_name: impl Into<String>,
        create: impl Fn(&str) -> Arc<dyn Block> + Send + Sync + 'static,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            create: Arc::new(create),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn instantiate(&self, name: &str) -> Arc<dyn Block> {
        (self.create)(name)
    }
}

/// Process-wide mapping class-name → block description.
///
/// Populated by modules during engine initialization and read-only
/// afterwards.
#[derive(Default)]
pub struct Registry {
    descriptions: HashMap<String, BlockDescription>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block description. Registration is idempotent: a class name
    /// seen before keeps its first description, and the duplicate is
    /// reported at warn level so colliding modules are visible.
    pub fn register(&mut self, description: BlockDescription) {
        let class_name = description.class_name().to_string();
        if self.descriptions.contains_key(&class_name) {
            tracing::warn!(class = %class_name, "duplicate block registration ignored (first wins)");
            return;
        }
        self.descriptions.insert(class_name, description);
    }

    /// Find the description for a class name.
    pub fn find(&self, class_name: &str) -> GraphResult<&BlockDescription> {
        self.descriptions
            .get(class_name)
            .ok_or_else(|| GraphError::UnknownClass(class_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }
}
