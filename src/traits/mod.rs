pub mod block;
pub mod module;

pub use block::{
    read_config, Block, BlockConfig, Consumer, InitContext, MessagePort, PortLookup, Producer,
    Runnable,
};
pub use module::{Module, ModuleResult};
