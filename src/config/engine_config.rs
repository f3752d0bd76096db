use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Engine configuration document.
///
/// Describes the whole block graph. Loaded from a JSON file; nothing in it
/// can change once the manager has initialized.
///
/// # Example
/// ```json
/// {
///     "blocks": [
///         { "name": "feed", "className": "tcp-client",
///           "config": { "host": "localhost", "port": 4000 } },
///         { "name": "frames", "className": "nmea-framer", "config": {} },
///         { "name": "log", "className": "console-logger",
///           "config": { "pattern": "nmea" } }
///     ],
///     "routes": [
///         { "sources": ["feed"], "destinations": ["frames"] },
///         { "name": "to-log", "dispatcher": "slow",
///           "sources": ["frames.default"], "destinations": ["log"] }
///     ]
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Extra folders scanned for loadable modules, besides the executable
    /// directory. Relative paths are resolved against the executable
    /// directory.
    #[serde(default)]
    pub additional_package_folders: Vec<String>,
    pub blocks: Vec<BlockEntry>,
    pub routes: Vec<RouteEntry>,
}

/// One block declaration: a unique name, the class to instantiate, and the
/// class-specific configuration handed to the instance.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockEntry {
    pub name: String,
    pub class_name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// One route declaration. Sources take the form `block` or `block.port`;
/// the bare form is only valid when the block owns exactly one port.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteEntry {
    #[serde(default)]
    pub name: Option<String>,
    /// Dispatcher carrying this route. Omitted routes share the reserved
    /// "default" dispatcher; the reserved name cannot be requested here.
    #[serde(default)]
    pub dispatcher: Option<String>,
    pub sources: Vec<String>,
    pub destinations: Vec<String>,
}

/// Load an engine configuration from a JSON file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let cfg: EngineConfig = serde_json::from_str(&content)?;
    Ok(cfg)
}

/// Check a block, port, or route name against the `^[a-z][a-z0-9-]*$`
/// grammar shared by all graph entities.
pub fn is_valid_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b'a'..=b'z') => {}
        _ => return false,
    }
    bytes.all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-'))
}
