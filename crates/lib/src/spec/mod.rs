//! Package specifications and their expansion into build variants.

pub mod expand;
pub mod fields;
pub mod loader;
mod types;

pub use expand::{ExpandError, Forest, Variant, VariantId};
pub use loader::{LoadError, Loader, select_packages};
pub use types::{FileAttr, PackageSpec, ResourceDescriptor, Scripts, Target};
