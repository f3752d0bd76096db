mod engine_config;

pub use engine_config::{is_valid_name, load_config, BlockEntry, EngineConfig, RouteEntry};
