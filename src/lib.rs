//! pipeworks is an in-process dataflow runtime: a JSON document declares a
//! graph of named blocks, the engine wires their output ports to consumers
//! through named dispatcher queues, and messages (opaque byte buffers) flow
//! from sources to sinks until shutdown is requested.

pub mod blocks;  // built-in block library (framers, router, I/O)
pub mod config;  // engine configuration document
pub mod engine;  // manager, registry, dispatchers, graph runtime
pub mod errors;  // error handling
pub mod logger;  // tracing subscriber setup for the binaries
pub mod message;
pub mod signals;
pub mod traits;  // block contract and module contract
