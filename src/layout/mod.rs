//! # Layout
//!
//! Per-revision descriptions of the host runtime's private method, class and field records.
//!
//! Every supported runtime revision has a module holding `#[repr(C)]` mirrors of its records and a [`Layout`]
//! implementation that turns mirror fields into [`Slot`]s with [`core::mem::offset_of!`].
//! The overlay and visibility engines only ever talk to records through a [`Layout`], so a wrong offset is
//! confined to one file and can be checked against the mirror in isolation.

use std::fmt;
use std::ptr;

use crate::version::RuntimeFamily;

pub mod art_4_4;
pub mod art_5_0;
pub mod art_5_1;
pub mod art_6_0;
pub mod art_7_0;
pub mod dalvik;

/// Width of a scalar slot inside a record
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Width {
    /// 16-bit value
    U16,
    /// 32-bit value, also used for compressed heap references
    U32,
    /// 64-bit value
    U64,
}

impl Width {
    /// Width of a native pointer on the current target
    pub const POINTER: Width = if cfg!(target_pointer_width = "64") {
        Width::U64
    } else {
        Width::U32
    };

    /// Size in bytes
    pub const fn size(self) -> usize {
        match self {
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }
}

/// Location of one field inside a record
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Slot {
    /// Byte offset from the start of the record
    pub offset: usize,
    /// Size of the stored value
    pub width: Width,
}

impl Slot {
    /// Creates a slot
    pub const fn new(offset: usize, width: Width) -> Self {
        Self { offset, width }
    }

    /// Reads the slot, zero-extended to 64 bits
    ///
    /// # Safety
    ///
    /// `base` must point to a readable record that is at least `offset + width` bytes long
    pub unsafe fn load(self, base: *const u8) -> u64 {
        let at = base.add(self.offset);
        match self.width {
            Width::U16 => ptr::read_unaligned(at as *const u16) as u64,
            Width::U32 => ptr::read_unaligned(at as *const u32) as u64,
            Width::U64 => ptr::read_unaligned(at as *const u64),
        }
    }

    /// Encodes `value` in native byte order, truncated to the slot's width
    pub fn encode(self, value: u64) -> Encoded {
        let mut bytes = [0u8; 8];
        let len = self.width.size();
        match self.width {
            Width::U16 => bytes[..len].copy_from_slice(&(value as u16).to_ne_bytes()),
            Width::U32 => bytes[..len].copy_from_slice(&(value as u32).to_ne_bytes()),
            Width::U64 => bytes.copy_from_slice(&value.to_ne_bytes()),
        }
        Encoded { bytes, len }
    }
}

/// Bytes ready to be written into a [`Slot`]
#[derive(Clone, Copy, Debug)]
pub struct Encoded {
    /// Backing storage, only the first `len` bytes are meaningful
    bytes: [u8; 8],
    /// Number of meaningful bytes
    len: usize,
}

impl Encoded {
    /// The encoded value
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// What a method field is used for by the runtime
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldKind {
    /// Which class the method belongs to
    Identity,
    /// Flags and indices consulted when dispatching
    Scalar,
    /// Function pointer the dispatch path jumps through
    EntryPoint,
    /// Resolved constant-pool arrays cached on the method
    ConstantPool,
    /// Compiled-code and bytecode metadata
    CodeMetadata,
}

/// Fields of a method record, across all revisions. A [`Layout`] only knows the ones its revision has.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MethodField {
    /// Declaring class reference
    DeclaringClass,
    /// Access flag word
    AccessFlags,
    /// Offset of the code item in the dex file
    DexCodeItemOffset,
    /// Index into the dex file's method ids
    DexMethodIndex,
    /// Entry in the vtable, direct methods or iftable
    MethodIndex,
    /// Interpreter hotness counter
    HotnessCount,
    /// Resolved methods cache
    DexCacheResolvedMethods,
    /// Resolved types cache
    DexCacheResolvedTypes,
    /// Resolved strings cache
    DexCacheStrings,
    /// Initialized static storage cache
    DexCacheInitializedStaticStorage,
    /// Entry used by the interpreter
    EntryPointFromInterpreter,
    /// Registered native function, or the resolution stub
    EntryPointFromJni,
    /// Entry used by compiled code
    EntryPointFromQuickCompiledCode,
    /// Bridge invoked by the interpreted runtime for native methods
    NativeFunc,
    /// GC map of compiled code
    GcMap,
    /// Native pc to dex pc mapping table
    MappingTable,
    /// Register map table of compiled code
    VmapTable,
    /// Callee-save core register mask
    CoreSpillMask,
    /// Callee-save floating point register mask
    FpSpillMask,
    /// Size of the compiled frame
    FrameSizeInBytes,
    /// Number of registers used by the bytecode
    RegistersSize,
    /// Number of outgoing argument registers
    OutsSize,
    /// Number of incoming argument registers
    InsSize,
    /// Dex file half of the method prototype
    ProtoDexFile,
    /// Proto index half of the method prototype
    ProtoIndex,
    /// Pointer to the bytecode instructions
    Insns,
    /// Precomputed JNI argument marshalling info
    JniArgInfo,
}

impl MethodField {
    /// Role of the field in dispatch
    pub fn kind(self) -> FieldKind {
        use MethodField::*;
        match self {
            DeclaringClass => FieldKind::Identity,
            AccessFlags | DexCodeItemOffset | DexMethodIndex | MethodIndex | HotnessCount
            | RegistersSize | OutsSize | InsSize | JniArgInfo => FieldKind::Scalar,
            EntryPointFromInterpreter | EntryPointFromJni | EntryPointFromQuickCompiledCode
            | NativeFunc => FieldKind::EntryPoint,
            DexCacheResolvedMethods
            | DexCacheResolvedTypes
            | DexCacheStrings
            | DexCacheInitializedStaticStorage => FieldKind::ConstantPool,
            GcMap | MappingTable | VmapTable | CoreSpillMask | FpSpillMask | FrameSizeInBytes
            | ProtoDexFile | ProtoIndex | Insns => FieldKind::CodeMetadata,
        }
    }
}

/// Fields of a class record touched by an overlay
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ClassField {
    /// Defining class loader reference
    ClassLoader,
    /// Superclass reference
    SuperClass,
    /// Thread running the static initializer
    ClinitThreadId,
    /// Initialization status
    Status,
}

/// One class-level bookkeeping step performed before a method record is overlaid
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClassFixup {
    /// Take over the replacement class's defining loader
    ClassLoader,
    /// Take over the replacement class's initializing thread
    ClinitThreadId,
    /// Take the replacement class's status minus one
    Status,
    /// Null out the superclass
    ClearSuperClass,
}

/// Byte layout of one runtime revision's records
pub trait Layout: Send + Sync {
    /// Which revision this is
    fn shape(&self) -> LayoutShape;

    /// Slot of a method field, `None` if this revision does not have it
    fn method_slot(&self, field: MethodField) -> Option<Slot>;

    /// Slot of a class field, `None` if this revision does not have it
    fn class_slot(&self, field: ClassField) -> Option<Slot>;

    /// Slot of the access flag word of a field record
    fn field_access_flags(&self) -> Slot;

    /// Method fields copied from the replacement onto the original, in order
    fn overlay_fields(&self) -> &'static [MethodField];

    /// Class bookkeeping performed before the overlay, in order
    fn class_fixups(&self) -> &'static [ClassFixup];

    /// Size of a method record in bytes
    fn method_size(&self) -> usize;

    /// Byte offset of a method field
    fn method_offset(&self, field: MethodField) -> Option<usize> {
        self.method_slot(field).map(|slot| slot.offset)
    }
}

/// Supported record layouts
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LayoutShape {
    /// Interpreted runtime
    Dalvik,
    /// Layered runtime, API level 19 and below
    Kitkat,
    /// Layered runtime, API levels 20 and 21
    Lollipop,
    /// Layered runtime, API level 22
    LollipopMr1,
    /// Layered runtime, API level 23
    Marshmallow,
    /// Layered runtime, API level 24 and above
    Nougat,
}

impl LayoutShape {
    /// Every layered-runtime shape, oldest first
    pub const ART: [LayoutShape; 5] = [
        LayoutShape::Kitkat,
        LayoutShape::Lollipop,
        LayoutShape::LollipopMr1,
        LayoutShape::Marshmallow,
        LayoutShape::Nougat,
    ];

    /// The layout descriptor for this shape
    pub fn layout(self) -> &'static dyn Layout {
        match self {
            LayoutShape::Dalvik => &dalvik::DalvikLayout,
            LayoutShape::Kitkat => &art_4_4::KitkatLayout,
            LayoutShape::Lollipop => &art_5_0::LollipopLayout,
            LayoutShape::LollipopMr1 => &art_5_1::LollipopMr1Layout,
            LayoutShape::Marshmallow => &art_6_0::MarshmallowLayout,
            LayoutShape::Nougat => &art_7_0::NougatLayout,
        }
    }

    /// Runtime family the shape belongs to
    pub fn family(self) -> RuntimeFamily {
        match self {
            LayoutShape::Dalvik => RuntimeFamily::Dalvik,
            _ => RuntimeFamily::Art,
        }
    }
}

impl fmt::Display for LayoutShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutShape::Dalvik => "dalvik",
            LayoutShape::Kitkat => "art-4.4",
            LayoutShape::Lollipop => "art-5.0",
            LayoutShape::LollipopMr1 => "art-5.1",
            LayoutShape::Marshmallow => "art-6.0",
            LayoutShape::Nougat => "art-7.0",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldKind, LayoutShape, MethodField, Slot, Width};

    #[test]
    /// Values are truncated to the slot width and read back zero-extended
    fn test_slot_roundtrip_widths() {
        let mut record = [0xffu8; 16];
        let slot = Slot::new(4, Width::U16);
        let encoded = slot.encode(0x1_2345);
        assert_eq!(encoded.as_bytes().len(), 2);
        record[4..6].copy_from_slice(encoded.as_bytes());
        assert_eq!(unsafe { slot.load(record.as_ptr()) }, 0x2345);
        // neighbours untouched
        assert_eq!(record[3], 0xff);
        assert_eq!(record[6], 0xff);
    }

    #[test]
    /// Every shape's descriptor reports itself and knows every field it overlays
    fn test_descriptors_are_complete() {
        for shape in LayoutShape::ART.into_iter().chain([LayoutShape::Dalvik]) {
            let layout = shape.layout();
            assert_eq!(layout.shape(), shape);
            for &field in layout.overlay_fields() {
                let slot = layout
                    .method_slot(field)
                    .unwrap_or_else(|| panic!("{shape}: {field:?} has no slot"));
                assert!(slot.offset + slot.width.size() <= layout.method_size());
            }
            for &fixup in layout.class_fixups() {
                let field = match fixup {
                    super::ClassFixup::ClassLoader => super::ClassField::ClassLoader,
                    super::ClassFixup::ClinitThreadId => super::ClassField::ClinitThreadId,
                    super::ClassFixup::Status => super::ClassField::Status,
                    super::ClassFixup::ClearSuperClass => super::ClassField::SuperClass,
                };
                assert!(layout.class_slot(field).is_some(), "{shape}: {field:?}");
            }
        }
    }

    #[test]
    /// Every shape overlays the declaring class, the access flags and at least one entry point
    fn test_overlay_covers_dispatch() {
        for shape in LayoutShape::ART.into_iter().chain([LayoutShape::Dalvik]) {
            let fields = shape.layout().overlay_fields();
            assert!(fields.contains(&MethodField::DeclaringClass), "{shape}");
            assert!(fields.contains(&MethodField::AccessFlags), "{shape}");
            assert!(
                fields.iter().any(|f| f.kind() == FieldKind::EntryPoint),
                "{shape}"
            );
        }
    }

    #[test]
    /// Slot offsets of a shape never overlap
    fn test_method_slots_disjoint() {
        for shape in LayoutShape::ART.into_iter().chain([LayoutShape::Dalvik]) {
            let layout = shape.layout();
            let mut slots: Vec<Slot> = layout
                .overlay_fields()
                .iter()
                .filter_map(|&f| layout.method_slot(f))
                .collect();
            slots.sort_by_key(|s| s.offset);
            for pair in slots.windows(2) {
                assert!(
                    pair[0].offset + pair[0].width.size() <= pair[1].offset,
                    "{shape}: {pair:?}"
                );
            }
        }
    }
}
