//! # Visibility
//!
//! Widens field access flags so replacement classes can reach private state of the classes they patch.
//!
//! Replacement code is compiled into a new class, and the runtime checks cross-class field access with a single
//! test of the field's access word. Flipping the private bit to public is all it takes; field offsets never change.

use log::debug;

use crate::access::AccessFlags;
use crate::handle::FieldHandle;
use crate::layout::Layout;
use crate::patcher::Patcher;

/// Field visibility engine for one layout
pub struct FieldVisibility<'a, P> {
    /// Layout the records are interpreted through
    layout: &'static dyn Layout,
    /// Writes into the records
    patcher: &'a P,
}

impl<'a, P: Patcher> FieldVisibility<'a, P> {
    /// Creates an engine that interprets records through `layout`
    pub fn new(layout: &'static dyn Layout, patcher: &'a P) -> Self {
        Self { layout, patcher }
    }

    /// Clears the private bit and sets the public bit of a field, returning the new flags.
    ///
    /// # Safety
    ///
    /// `field` must address a live field record of the runtime revision described by the layout
    pub unsafe fn lift(&self, field: FieldHandle) -> Result<AccessFlags, P::Error> {
        let slot = self.layout.field_access_flags();
        let flags = AccessFlags::from_word(slot.load(field.as_ptr()) as u32).lifted();
        self.patcher.patch(
            field.as_ptr().add(slot.offset),
            slot.encode(flags.bits() as u64).as_bytes(),
        )?;
        debug!(
            "{}: field {:#x} flags now {:#x}",
            self.layout.shape(),
            field.addr(),
            flags.bits()
        );
        Ok(flags)
    }
}
