//! # Patcher
//!
//! This module covers patchers, which are used to overwrite locations in runtime-owned memory.
//!
//! Overlays are permanent, so unlike a hooking patcher nothing here keeps the original bytes around.

pub mod byte;
pub mod mem;

/// Writes bytes into memory that Rust does not own
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must ensure that the implementation of `patch` writes exactly
/// `patch.len()` bytes at `target` and nothing else
pub unsafe trait Patcher {
    /// Error type that can occur when patching. If patching always succeeds, use [`std::convert::Infallible`].
    type Error;

    /// Overwrites `patch.len()` bytes at `target`.
    ///
    /// # Safety
    ///
    /// `target` must be [valid](https://doc.rust-lang.org/stable/std/ptr/index.html#safety) for writes of the full
    /// size of the patch, and must not be memory that Rust code holds a reference to
    unsafe fn patch(&self, target: *mut u8, patch: &[u8]) -> Result<(), Self::Error>;
}

unsafe impl<P: Patcher + ?Sized> Patcher for &P {
    type Error = P::Error;

    unsafe fn patch(&self, target: *mut u8, patch: &[u8]) -> Result<(), Self::Error> {
        (**self).patch(target, patch)
    }
}
