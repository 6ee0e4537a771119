pub mod leaves;
pub mod registry;

pub use leaves::{ContainerLeaf, ErrorLeaf, GenericLeaf, LabelLeaf, Leniency, StreamLeaf};
pub use registry::{collect_tags, ComponentLoader, ComponentRegistry, EnsureReport, RegistryError, Resolution};
