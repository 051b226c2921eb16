//! This module contains a patcher which adjusts memory permissions to patch read-only data.
//!
//! Method records of classes in the boot image can sit in mappings that are not writable.

use std::convert::Infallible;

use region::Protection;
use thiserror::Error;

use super::Patcher;

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when querying or setting memory protections
    #[error("Error setting memory protections")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}
impl From<Infallible> for PermissionError<Infallible> {
    fn from(e: Infallible) -> Self {
        Self::CustomError(e)
    }
}

/// This struct wraps patchers to allow them to write to memory that's normally unwritable.
/// It achieves this result by adding write permission to the target memory, triggering the patch, and then reverting
/// the permissions.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to change write permissions,
/// pairing `PermissionWrapper` with a patcher that writes more memory than the size of the patch is undefined behavior.
///
/// The protection of the first page of the target is extended with [`Protection::WRITE`] for every page of the
/// patch, so a patch straddling pages with different protections briefly gives all of them the first page's.
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}
impl<P: Patcher + Default> Default for PermissionWrapper<P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    PermissionError<P::Error>: From<P::Error>,
{
    type Error = PermissionError<P::Error>;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<(), Self::Error> {
        let current = region::query(location as *const u8)?.protection();
        // restores the previous protection when dropped
        let _guard =
            region::protect_with_handle(location, patch.len(), current | Protection::WRITE)?;
        self.patcher.patch(location, patch).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::{ptr, slice};

    use region::Protection;

    use crate::patcher::byte::BytePatcher;
    use crate::patcher::mem::PermissionWrapper;
    use crate::patcher::Patcher;

    #[test]
    /// Test patch functionality on writable memory
    fn test_patch() {
        let mut data = vec![1u8, 2, 3, 4];

        // create the patcher and wrapper
        let patcher = BytePatcher::new();
        let wrapper = PermissionWrapper::new(patcher);

        // patch the vec's data
        unsafe { wrapper.patch(data.as_mut_ptr(), &[4, 3, 2, 1]).unwrap() };

        // make sure the data was actually changed
        assert_eq!(data, [4, 3, 2, 1]);
    }

    #[test]
    /// Tests to ensure permissions are actually set
    fn test_perms() {
        // Global immutables are stored in a read-only section in the binary.
        // Normally, writing to this global would result in a segfault, but PermissionWrapper changes the permissions to be writable so that no fault occurs
        static DATA: [u8; 4] = *b"wxyz";

        let ptr = DATA.as_ptr();
        let size = DATA.len();

        // sanity check
        // make sure the data is what we expect and that the data is definitely read-only
        assert_eq!(
            unsafe { slice::from_raw_parts(ptr, size) },
            [b'w', b'x', b'y', b'z']
        );
        for region in region::query_range(ptr, size).unwrap() {
            let region = region.unwrap();
            assert!(!region.is_guarded());
            assert_eq!(region.protection(), Protection::READ);
        }

        // create the patcher and wrapper
        let wrapper = PermissionWrapper::new(BytePatcher::new());

        // patch the static's data
        unsafe { wrapper.patch(ptr as *mut u8, &[4, 3, 2, 1]).unwrap() };

        // make sure the data was actually changed
        // Note: volatile reads, the compiler is free to assume an immutable static never changes
        let patched: Vec<u8> = (0..size)
            .map(|i| unsafe { ptr::read_volatile(ptr.add(i)) })
            .collect();
        assert_eq!(patched, [4, 3, 2, 1]);

        // make sure permissions reverted correctly after the patch
        for region in region::query_range(ptr, size).unwrap() {
            let region = region.unwrap();
            assert!(!region.is_guarded());
            assert_eq!(region.protection(), Protection::READ);
        }
    }
}
