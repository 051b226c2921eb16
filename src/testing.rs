//! Test doubles for runtime records

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use crate::handle::{ClassHandle, FieldHandle, HeapRefs, MethodHandle};
use crate::layout::Slot;

/// Words backing a [`Record`], large enough for every mirrored record
const RECORD_WORDS: usize = 32;

/// Zeroed, 8-byte aligned heap block standing in for a runtime record.
///
/// Only accessed through raw pointers, like the runtime's own memory.
pub struct Record(NonNull<[u64; RECORD_WORDS]>);

impl Record {
    /// Allocates a zeroed record
    pub fn new() -> Self {
        let block = Box::new([0u64; RECORD_WORDS]);
        Self(NonNull::from(Box::leak(block)))
    }

    /// Base address
    pub fn ptr(&self) -> *mut u8 {
        self.0.as_ptr() as *mut u8
    }

    /// Handle for use as a method record
    pub fn handle(&self) -> MethodHandle {
        MethodHandle::new(self.ptr() as *mut c_void).unwrap()
    }

    /// Handle for use as a class record
    pub fn class(&self) -> ClassHandle {
        ClassHandle::new(self.ptr() as *mut c_void).unwrap()
    }

    /// Handle for use as a field record
    pub fn field(&self) -> FieldHandle {
        FieldHandle::new(self.ptr() as *mut c_void).unwrap()
    }

    /// Reads a slot
    pub fn load(&self, slot: Slot) -> u64 {
        unsafe { slot.load(self.ptr()) }
    }

    /// Writes a slot directly, bypassing any patcher
    pub fn store(&mut self, slot: Slot, value: u64) {
        let encoded = slot.encode(value);
        let bytes = encoded.as_bytes();
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr().add(slot.offset), bytes.len()) };
    }

    /// Snapshot of the whole record
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; RECORD_WORDS * 8];
        unsafe { ptr::copy_nonoverlapping(self.ptr(), out.as_mut_ptr(), out.len()) };
        out
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        // Safety: the block came from `Box::leak` in `new` and is only freed here
        unsafe { drop(Box::from_raw(self.0.as_ptr())) };
    }
}

/// Maps small fake reference values onto class records
#[derive(Default)]
pub struct FakeHeap {
    /// Reference value and record address pairs
    classes: Vec<(u64, usize)>,
}

impl FakeHeap {
    /// Creates an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `reference` decode to `record`
    pub fn register(&mut self, reference: u64, record: &Record) {
        self.register_raw(reference, record.ptr());
    }

    /// Makes `reference` decode to the record at `ptr`
    pub fn register_raw(&mut self, reference: u64, ptr: *mut u8) {
        self.classes.push((reference, ptr as usize));
    }
}

impl HeapRefs for FakeHeap {
    fn decode(&self, reference: u64) -> Option<ClassHandle> {
        self.classes
            .iter()
            .find(|(r, _)| *r == reference)
            .and_then(|&(_, addr)| ClassHandle::from_addr(addr))
    }
}
