pub mod catalog;
pub mod client;
pub mod error;
pub mod types;

pub use catalog::{ToolCatalog, ToolCatalogCache};
pub use client::RoleRegistryClient;
pub use error::{RegistryError, Result};
pub use types::{RoleEntry, ToolSpec};
