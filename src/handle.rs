//! # Handles
//!
//! Borrowed addresses of the host runtime's internal method, class and field records.
//!
//! The runtime owns the memory behind every handle; nothing here tracks its lifetime.

use std::ffi::c_void;
use std::ptr::NonNull;

/// Declares a non-null address newtype for one kind of runtime record
macro_rules! record_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name(NonNull<u8>);

        impl $name {
            /// Wraps a raw record address. Returns `None` for null.
            pub fn new(ptr: *mut c_void) -> Option<Self> {
                NonNull::new(ptr as *mut u8).map(Self)
            }

            /// Wraps a record address stored as an integer, as found in reference slots
            pub fn from_addr(addr: usize) -> Option<Self> {
                Self::new(addr as *mut c_void)
            }

            /// Base address of the record
            pub fn as_ptr(self) -> *mut u8 {
                self.0.as_ptr()
            }

            /// Base address of the record as an integer
            pub fn addr(self) -> usize {
                self.0.as_ptr() as usize
            }
        }
    };
}

record_handle!(
    /// Address of a runtime method record (`ArtMethod` / `Method`)
    MethodHandle
);
record_handle!(
    /// Address of a runtime class record (`mirror::Class` / `ClassObject`)
    ClassHandle
);
record_handle!(
    /// Address of a runtime field record (`ArtField` / `Field`)
    FieldHandle
);

/// Decodes class references stored inside method records.
///
/// The layered runtime stores 32-bit heap references, the interpreted runtime stores native pointers.
/// Both are plain addresses on a stock runtime, which is what the default implementation assumes.
pub trait HeapRefs {
    /// Turns a stored reference value into the class record it points at
    fn decode(&self, reference: u64) -> Option<ClassHandle> {
        ClassHandle::from_addr(reference as usize)
    }
}

/// Reference decoder for runtimes that store raw addresses
#[derive(Clone, Copy, Default, Debug)]
pub struct Direct;
impl HeapRefs for Direct {}

#[cfg(test)]
mod tests {
    use std::ptr;

    use super::{Direct, HeapRefs, MethodHandle};

    #[test]
    /// Null addresses never produce a handle
    fn test_null() {
        assert!(MethodHandle::new(ptr::null_mut()).is_none());
        assert!(Direct.decode(0).is_none());
    }

    #[test]
    /// Direct decoding is the identity
    fn test_direct_decode() {
        let class = Direct.decode(0x7000_1000).unwrap();
        assert_eq!(class.addr(), 0x7000_1000);
    }
}
