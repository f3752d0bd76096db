pub mod dispatcher;
#[cfg(test)]
mod integration_tests;
pub mod mailbox;
pub mod manager;
pub mod module_loader;
pub mod port;
pub mod registry;
pub mod route;

pub use dispatcher::Dispatcher;
pub use mailbox::Mailbox;
pub use manager::{Manager, ShutdownHandle};
pub use module_loader::ModuleLoader;
pub use port::Port;
pub use registry::{BlockDescription, BlockFactory, Registry};
pub use route::Route;
