#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod access;
pub mod bootstrap;
pub mod handle;
pub mod layout;
pub mod overlay;
pub mod patcher;
pub mod reflect;
pub mod runtime;
pub mod version;
pub mod visibility;

#[cfg(test)]
mod testing;

pub use access::AccessFlags;
pub use handle::{ClassHandle, FieldHandle, HeapRefs, MethodHandle};
pub use layout::{Layout, LayoutShape};
pub use runtime::{Runtime, State};
pub use version::RuntimeFamily;
