mod container;
mod error;
mod generic;
mod label;
mod stream;

pub use container::ContainerLeaf;
pub use error::ErrorLeaf;
pub use generic::GenericLeaf;
pub use label::LabelLeaf;
pub use stream::{Leniency, StreamLeaf};
