//! Model metadata: field and model descriptors, the frozen registry, and
//! field path resolution.

pub mod field;
pub mod model;
pub mod registry;
pub mod resolver;

pub use field::{Aggregate, FieldDescriptor, FieldType, LinkTable};
pub use model::ModelDescriptor;
pub use registry::{Registry, RegistryBuilder, DEFAULT_MAX_PATH_SUBSTITUTIONS};
pub use resolver::{domain_key, resolve, PathStep, ResolvedPath};
