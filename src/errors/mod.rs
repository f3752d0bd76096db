mod block;
mod graph;

pub use block::{BlockError, BlockResult};
pub use graph::{GraphError, GraphResult};
