use crate::engine::Registry;

/// Result of a module's registration call.
pub type ModuleResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A plug-in publishing block factories to the [`Registry`].
///
/// Built-in modules are plain values handed to the manager before startup;
/// external modules are dynamic libraries exporting the `registerBlocks`
/// entry point, wrapped into this trait by the module loader.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Publish zero or more block descriptions. Errors abort engine
    /// initialization.
    fn register_blocks(&self, registry: &mut Registry) -> ModuleResult;
}
