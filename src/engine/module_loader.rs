use std::path::{Path, PathBuf};

use libloading::Library;

use crate::engine::registry::Registry;
use crate::errors::{GraphError, GraphResult};
use crate::traits::Module;

/// Signature of the registration entry point exported by loadable modules.
type RegisterBlocksFn = unsafe extern "C" fn(&mut Registry);

/// Discovers and registers block modules.
///
/// Two kinds of module feed the registry: built-in [`Module`] values handed
/// to the loader before startup, and dynamic libraries found in the
/// executable directory plus any `additionalPackageFolders`. A shared
/// library qualifies as a module by exporting the `registerBlocks` symbol;
/// anything else in those folders is skipped without complaint. Loaded
/// library handles are retained for the lifetime of the loader so the
/// factories they registered stay valid.
pub struct ModuleLoader {
    modules: Vec<Box<dyn Module>>,
    libraries: Vec<Library>,
}

impl ModuleLoader {
    pub const ENTRY_POINT: &'static [u8] = b"registerBlocks";

    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            libraries: Vec::new(),
        }
    }

    /// Register a built-in module, applied before any folder scan.
    pub fn add_module(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    /// Run every registration: built-ins first, then the executable
    /// directory, then each additional folder (relative entries resolved
    /// against the executable directory).
    pub fn load(&mut self, registry: &mut Registry, extra_folders: &[String]) -> GraphResult<()> {
        for module in &self.modules {
            module
                .register_blocks(registry)
                .map_err(|source| GraphError::ModuleLoad {
                    module: module.name().to_string(),
                    reason: source.to_string(),
                })?;
            tracing::debug!(module = %module.name(), "built-in module registered");
        }

        let exe_folder = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from));

        if let Some(folder) = &exe_folder {
            self.load_folder(folder, registry);
        }

        for entry in extra_folders {
            let mut path = PathBuf::from(entry);
            if path.is_relative() {
                if let Some(base) = &exe_folder {
                    path = base.join(path);
                }
            }
            self.load_folder(&path, registry);
        }

        Ok(())
    }

    fn load_folder(&mut self, folder: &Path, registry: &mut Registry) {
        let entries = match std::fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::debug!(folder = %folder.display(), %error, "module folder not readable");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_library = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == std::env::consts::DLL_EXTENSION)
                .unwrap_or(false);
            if !is_library {
                continue;
            }

            // Safety: loading foreign code is inherently unsafe; the entry
            // point contract requires modules built with the same toolchain
            // as the host.
            let library = match unsafe { Library::new(&path) } {
                Ok(library) => library,
                Err(error) => {
                    tracing::debug!(library = %path.display(), %error, "not loadable, skipped");
                    continue;
                }
            };

            let register: RegisterBlocksFn =
                match unsafe { library.get::<RegisterBlocksFn>(Self::ENTRY_POINT) } {
                    Ok(symbol) => *symbol,
                    // No entry point: an ordinary shared library, not a module.
                    Err(_) => continue,
                };

            unsafe { register(registry) };
            tracing::info!(module = %path.display(), "module loaded");
            self.libraries.push(library);
        }
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::BlockDescription;
    use crate::traits::ModuleResult;
    use std::sync::Arc;

    struct StaticModule;

    impl Module for StaticModule {
        fn name(&self) -> &str {
            "static"
        }

        fn register_blocks(&self, registry: &mut Registry) -> ModuleResult {
            registry.register(BlockDescription::new("probe", |name| {
                Arc::new(crate::blocks::testing::CollectorBlock::new(name))
            }));
            Ok(())
        }
    }

    struct BrokenModule;

    impl Module for BrokenModule {
        fn name(&self) -> &str {
            "broken"
        }

        fn register_blocks(&self, _registry: &mut Registry) -> ModuleResult {
            Err("registration exploded".into())
        }
    }

    #[test]
    fn built_in_modules_populate_the_registry() {
        let mut loader = ModuleLoader::new();
        loader.add_module(Box::new(StaticModule));

        let mut registry = Registry::new();
        loader.load(&mut registry, &[]).unwrap();

        assert!(registry.find("probe").is_ok());
    }

    #[test]
    fn missing_extra_folders_are_skipped() {
        let mut loader = ModuleLoader::new();
        let mut registry = Registry::new();

        loader
            .load(&mut registry, &["no/such/folder".to_string()])
            .unwrap();
    }

    #[test]
    fn failing_module_aborts_the_load() {
        let mut loader = ModuleLoader::new();
        loader.add_module(Box::new(BrokenModule));

        let mut registry = Registry::new();
        let error = loader.load(&mut registry, &[]).unwrap_err();
        assert!(matches!(error, GraphError::ModuleLoad { module, .. } if module == "broken"));
    }
}
