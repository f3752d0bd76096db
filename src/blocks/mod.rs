//! Built-in block library, grouped into the modules the engine registers
//! by default: general I/O blocks and the NMEA 0183 marine blocks.

mod console_logger;
mod file_logger;
mod framer;
mod nmea_framer;
mod nmea_router;
mod tcp_client;

#[cfg(test)]
pub(crate) mod testing;

pub use console_logger::ConsoleLogger;
pub use file_logger::FileLogger;
pub use framer::Framer;
pub use nmea_framer::NmeaFramer;
pub use nmea_router::{NmeaRouter, TrieError};
pub use tcp_client::TcpClient;

use crate::engine::Registry;
use crate::traits::{Module, ModuleResult};

/// General-purpose I/O blocks: stream sources, framing, logging sinks.
pub struct IoModule;

impl Module for IoModule {
    fn name(&self) -> &str {
        "io"
    }

    fn register_blocks(&self, registry: &mut Registry) -> ModuleResult {
        registry.register(ConsoleLogger::description());
        registry.register(FileLogger::description());
        registry.register(Framer::description());
        registry.register(TcpClient::description());
        Ok(())
    }
}

/// NMEA 0183 marine blocks: sentence framing and prefix routing.
pub struct MarineModule;

impl Module for MarineModule {
    fn name(&self) -> &str {
        "marine"
    }

    fn register_blocks(&self, registry: &mut Registry) -> ModuleResult {
        registry.register(NmeaFramer::description());
        registry.register(NmeaRouter::description());
        Ok(())
    }
}

/// The modules the engine binary installs before scanning for external
/// ones.
pub fn builtin_modules() -> Vec<Box<dyn Module>> {
    vec![Box::new(IoModule), Box::new(MarineModule)]
}
