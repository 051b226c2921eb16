//! # Overlay
//!
//! Copies the dispatch-relevant fields of a replacement method record onto an original one.
//!
//! After an overlay every call routed through the original record runs the replacement's code with the
//! replacement's resolved constants, while the original keeps its managed-visible identity. Nothing is backed up;
//! the original record cannot be restored.

use std::fmt;

use log::debug;
use thiserror::Error;

use crate::access::AccessFlags;
use crate::handle::{ClassHandle, HeapRefs, MethodHandle};
use crate::layout::{ClassField, ClassFixup, Layout, LayoutShape, MethodField, Slot};
use crate::patcher::Patcher;

/// Which side of an overlay a record belongs to
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    /// The method being replaced
    Original,
    /// The method supplying the new code
    Replacement,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Original => f.write_str("original"),
            Role::Replacement => f.write_str("replacement"),
        }
    }
}

/// Errors while overlaying a method
#[derive(Debug, Error)]
pub enum OverlayError<E> {
    /// The declaring class reference of a method decoded to null
    #[error("{0} method has no declaring class")]
    NullClass(Role),
    /// The layout lists a method field it has no slot for
    #[error("{shape} has no slot for method field {field:?}")]
    MissingMethodSlot {
        /// Active layout
        shape: LayoutShape,
        /// Field without a slot
        field: MethodField,
    },
    /// The layout lists a class fixup it has no slot for
    #[error("{shape} has no slot for class field {field:?}")]
    MissingClassSlot {
        /// Active layout
        shape: LayoutShape,
        /// Field without a slot
        field: ClassField,
    },
    /// Writing into the record failed
    #[error("{0}")]
    Patch(E),
}

/// Method overlay engine for one layout
pub struct MethodOverlay<'a, P, H> {
    /// Layout the records are interpreted through
    layout: &'static dyn Layout,
    /// Writes into the records
    patcher: &'a P,
    /// Decodes declaring class references
    heap: &'a H,
}

impl<'a, P, H> MethodOverlay<'a, P, H>
where
    P: Patcher,
    H: HeapRefs,
{
    /// Creates an engine that interprets records through `layout`
    pub fn new(layout: &'static dyn Layout, patcher: &'a P, heap: &'a H) -> Self {
        Self {
            layout,
            patcher,
            heap,
        }
    }

    /// Makes `original` dispatch to `replacement`'s code.
    ///
    /// Class bookkeeping runs first, while `original` still points at its own class. It is skipped whenever both
    /// methods share a declaring class. That covers a repeated overlay, which then leaves the original record exactly
    /// as after the first one. It also covers a first overlay between two methods of the same class, where the
    /// bookkeeping would only decrement and detach that class's own status and superclass.
    ///
    /// # Safety
    ///
    /// Both handles must address live method records of the runtime revision described by the layout, and their
    /// declaring classes must be live class records. A layout that does not match the runtime corrupts memory.
    pub unsafe fn overlay(
        &self,
        original: MethodHandle,
        replacement: MethodHandle,
    ) -> Result<(), OverlayError<P::Error>> {
        if !self.layout.class_fixups().is_empty() {
            let original_class = self.declaring_class(original, Role::Original)?;
            let replacement_class = self.declaring_class(replacement, Role::Replacement)?;
            if original_class != replacement_class {
                for &fixup in self.layout.class_fixups() {
                    self.fix_up(fixup, original_class, replacement_class)?;
                }
            }
        }

        for &field in self.layout.overlay_fields() {
            let slot = self.method_slot(field)?;
            let mut value = slot.load(replacement.as_ptr());
            if field == MethodField::AccessFlags {
                value = (AccessFlags::from_word(value as u32) | AccessFlags::PUBLIC).bits() as u64;
            }
            self.store(original.as_ptr(), slot, value)?;
        }

        if let Some(slot) = self
            .layout
            .method_slot(MethodField::EntryPointFromQuickCompiledCode)
        {
            debug!(
                "{}: overlaid {:#x} with {:#x}, compiled entry {:#x}",
                self.layout.shape(),
                original.addr(),
                replacement.addr(),
                slot.load(original.as_ptr())
            );
        } else {
            debug!(
                "{}: overlaid {:#x} with {:#x}",
                self.layout.shape(),
                original.addr(),
                replacement.addr()
            );
        }
        Ok(())
    }

    /// Sets the initialization status of a class record
    ///
    /// # Safety
    ///
    /// `class` must address a live class record of the runtime revision described by the layout
    pub unsafe fn mark_initialized(
        &self,
        class: ClassHandle,
        status: i32,
    ) -> Result<(), OverlayError<P::Error>> {
        let slot = self.class_slot(ClassField::Status)?;
        self.store(class.as_ptr(), slot, status as u32 as u64)?;
        debug!(
            "{}: class {:#x} marked initialized",
            self.layout.shape(),
            class.addr()
        );
        Ok(())
    }

    /// Applies one class bookkeeping step to the original's class
    unsafe fn fix_up(
        &self,
        fixup: ClassFixup,
        original: ClassHandle,
        replacement: ClassHandle,
    ) -> Result<(), OverlayError<P::Error>> {
        match fixup {
            ClassFixup::ClassLoader => {
                let slot = self.class_slot(ClassField::ClassLoader)?;
                self.store(original.as_ptr(), slot, slot.load(replacement.as_ptr()))
            }
            ClassFixup::ClinitThreadId => {
                let slot = self.class_slot(ClassField::ClinitThreadId)?;
                self.store(original.as_ptr(), slot, slot.load(replacement.as_ptr()))
            }
            ClassFixup::Status => {
                let slot = self.class_slot(ClassField::Status)?;
                let status = (slot.load(replacement.as_ptr()) as u32).wrapping_sub(1);
                self.store(original.as_ptr(), slot, status as u64)
            }
            ClassFixup::ClearSuperClass => {
                let slot = self.class_slot(ClassField::SuperClass)?;
                self.store(original.as_ptr(), slot, 0)
            }
        }
    }

    /// Decodes the declaring class of a method record
    unsafe fn declaring_class(
        &self,
        method: MethodHandle,
        role: Role,
    ) -> Result<ClassHandle, OverlayError<P::Error>> {
        let slot = self.method_slot(MethodField::DeclaringClass)?;
        self.heap
            .decode(slot.load(method.as_ptr()))
            .ok_or(OverlayError::NullClass(role))
    }

    /// Slot of a method field the layout must have
    fn method_slot(&self, field: MethodField) -> Result<Slot, OverlayError<P::Error>> {
        self.layout
            .method_slot(field)
            .ok_or(OverlayError::MissingMethodSlot {
                shape: self.layout.shape(),
                field,
            })
    }

    /// Slot of a class field the layout must have
    fn class_slot(&self, field: ClassField) -> Result<Slot, OverlayError<P::Error>> {
        self.layout
            .class_slot(field)
            .ok_or(OverlayError::MissingClassSlot {
                shape: self.layout.shape(),
                field,
            })
    }

    /// Writes `value` into `slot` of the record at `base`
    unsafe fn store(
        &self,
        base: *mut u8,
        slot: Slot,
        value: u64,
    ) -> Result<(), OverlayError<P::Error>> {
        self.patcher
            .patch(base.add(slot.offset), slot.encode(value).as_bytes())
            .map_err(OverlayError::Patch)
    }
}
