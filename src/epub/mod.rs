mod container;
mod dom;

pub use container::EpubContainer;
pub use dom::{Document, NodeId};
