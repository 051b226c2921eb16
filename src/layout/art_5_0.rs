//! Record layout of the layered runtime for API levels 20 and 21.
//!
//! Methods are still heap objects with 32-bit references, but entry points are always stored as 64-bit values.

use std::mem::{offset_of, size_of};

use super::{ClassField, ClassFixup, Layout, LayoutShape, MethodField, Slot, Width};

/// Rust mirror of `mirror::Object`
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Object {
    /// Class of the object
    pub klass: u32,
    /// Lock word
    pub monitor: u32,
}

/// Rust mirror of `mirror::Class`
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Class {
    /// Object header
    pub header: Object,
    /// Defining class loader, or null for the bootstrap loader
    pub class_loader: u32,
    /// Component type for arrays
    pub component_type: u32,
    /// Resolved constant pool entries
    pub dex_cache: u32,
    /// Static, private and `<init>` methods
    pub direct_methods: u32,
    /// Instance fields
    pub ifields: u32,
    /// Interface table
    pub iftable: u32,
    /// Interface method table
    pub imtable: u32,
    /// Descriptor
    pub name: u32,
    /// Static fields
    pub sfields: u32,
    /// Superclass, or null for `java.lang.Object`
    pub super_class: u32,
    /// Cached verification error
    pub verify_error_class: u32,
    /// Virtual methods
    pub virtual_methods: u32,
    /// Virtual method table
    pub vtable: u32,
    /// Access flags
    pub access_flags: u32,
    /// Total size of the class object
    pub class_size: u32,
    /// Tid used to check for recursive `<clinit>`
    pub clinit_thread_id: i32,
    /// Class def index
    pub dex_class_def_idx: i32,
    /// Type index
    pub dex_type_idx: i32,
    /// Reference instance field count
    pub num_reference_instance_fields: u32,
    /// Reference static field count
    pub num_reference_static_fields: u32,
    /// Instance size
    pub object_size: u32,
    /// Primitive type
    pub primitive_type: u32,
    /// Bitmap of reference instance field offsets
    pub reference_instance_offsets: u32,
    /// Bitmap of reference static field offsets
    pub reference_static_offsets: u32,
    /// Initialization status
    pub status: i32,
}

/// Rust mirror of `mirror::ArtField`
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct ArtField {
    /// Object header
    pub header: Object,
    /// Declaring class
    pub declaring_class: u32,
    /// Access flags
    pub access_flags: u32,
    /// Field id index
    pub field_dex_idx: u32,
    /// Offset in the instance or static storage
    pub offset: u32,
}

/// Rust mirror of `mirror::ArtMethod`
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct ArtMethod {
    /// Object header
    pub header: Object,
    /// Declaring class
    pub declaring_class: u32,
    /// Resolved methods of the declaring class's dex cache
    pub dex_cache_resolved_methods: u32,
    /// Resolved types of the declaring class's dex cache
    pub dex_cache_resolved_types: u32,
    /// Resolved strings of the declaring class's dex cache
    pub dex_cache_strings: u32,
    /// Interpreter entry
    pub entry_point_from_interpreter: u64,
    /// Registered native code
    pub entry_point_from_jni: u64,
    /// Portable compiled code entry
    pub entry_point_from_portable_compiled_code: u64,
    /// Quick compiled code entry
    pub entry_point_from_quick_compiled_code: u64,
    /// GC map
    pub gc_map: u64,
    /// Access flags
    pub access_flags: u32,
    /// Code item offset
    pub dex_code_item_offset: u32,
    /// Method id index
    pub dex_method_index: u32,
    /// Dispatch table index
    pub method_index: u32,
}

/// Overlay order for `ArtMethod`. The portable entry is left alone.
const OVERLAY: &[MethodField] = &[
    MethodField::DeclaringClass,
    MethodField::AccessFlags,
    MethodField::DexCacheResolvedTypes,
    MethodField::DexCacheResolvedMethods,
    MethodField::DexCacheStrings,
    MethodField::DexCodeItemOffset,
    MethodField::DexMethodIndex,
    MethodField::GcMap,
    MethodField::EntryPointFromJni,
    MethodField::EntryPointFromQuickCompiledCode,
    MethodField::EntryPointFromInterpreter,
    MethodField::MethodIndex,
];

/// Class bookkeeping order
const FIXUPS: &[ClassFixup] = &[
    ClassFixup::ClassLoader,
    ClassFixup::ClinitThreadId,
    ClassFixup::Status,
    ClassFixup::ClearSuperClass,
];

/// Layout of the layered runtime, API levels 20 and 21
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct LollipopLayout;

impl Layout for LollipopLayout {
    fn shape(&self) -> LayoutShape {
        LayoutShape::Lollipop
    }

    fn method_slot(&self, field: MethodField) -> Option<Slot> {
        let slot = match field {
            MethodField::DeclaringClass => {
                Slot::new(offset_of!(ArtMethod, declaring_class), Width::U32)
            }
            MethodField::AccessFlags => Slot::new(offset_of!(ArtMethod, access_flags), Width::U32),
            MethodField::DexCodeItemOffset => {
                Slot::new(offset_of!(ArtMethod, dex_code_item_offset), Width::U32)
            }
            MethodField::DexMethodIndex => {
                Slot::new(offset_of!(ArtMethod, dex_method_index), Width::U32)
            }
            MethodField::MethodIndex => Slot::new(offset_of!(ArtMethod, method_index), Width::U32),
            MethodField::DexCacheResolvedMethods => {
                Slot::new(offset_of!(ArtMethod, dex_cache_resolved_methods), Width::U32)
            }
            MethodField::DexCacheResolvedTypes => {
                Slot::new(offset_of!(ArtMethod, dex_cache_resolved_types), Width::U32)
            }
            MethodField::DexCacheStrings => {
                Slot::new(offset_of!(ArtMethod, dex_cache_strings), Width::U32)
            }
            MethodField::EntryPointFromInterpreter => {
                Slot::new(offset_of!(ArtMethod, entry_point_from_interpreter), Width::U64)
            }
            MethodField::EntryPointFromJni => {
                Slot::new(offset_of!(ArtMethod, entry_point_from_jni), Width::U64)
            }
            MethodField::EntryPointFromQuickCompiledCode => Slot::new(
                offset_of!(ArtMethod, entry_point_from_quick_compiled_code),
                Width::U64,
            ),
            MethodField::GcMap => Slot::new(offset_of!(ArtMethod, gc_map), Width::U64),
            _ => return None,
        };
        Some(slot)
    }

    fn class_slot(&self, field: ClassField) -> Option<Slot> {
        let offset = match field {
            ClassField::ClassLoader => offset_of!(Class, class_loader),
            ClassField::SuperClass => offset_of!(Class, super_class),
            ClassField::ClinitThreadId => offset_of!(Class, clinit_thread_id),
            ClassField::Status => offset_of!(Class, status),
        };
        Some(Slot::new(offset, Width::U32))
    }

    fn field_access_flags(&self) -> Slot {
        Slot::new(offset_of!(ArtField, access_flags), Width::U32)
    }

    fn overlay_fields(&self) -> &'static [MethodField] {
        OVERLAY
    }

    fn class_fixups(&self) -> &'static [ClassFixup] {
        FIXUPS
    }

    fn method_size(&self) -> usize {
        size_of::<ArtMethod>()
    }
}

#[cfg(test)]
mod tests {
    use super::LollipopLayout;
    use crate::layout::{ClassField, Layout, MethodField, Width};

    #[test]
    /// Entry points are 64-bit regardless of the target
    fn test_entry_points_are_wide() {
        let layout = LollipopLayout;
        let quick = layout
            .method_slot(MethodField::EntryPointFromQuickCompiledCode)
            .unwrap();
        assert_eq!(quick.width, Width::U64);
        assert_eq!(quick.offset, 48);
        assert_eq!(layout.method_offset(MethodField::AccessFlags), Some(64));
        assert_eq!(layout.method_size(), 80);
    }

    #[test]
    /// Class fields written by the bookkeeping steps
    fn test_class_offsets() {
        let layout = LollipopLayout;
        for (field, offset) in [
            (ClassField::ClassLoader, 8),
            (ClassField::SuperClass, 44),
            (ClassField::ClinitThreadId, 68),
            (ClassField::Status, 104),
        ] {
            let slot = layout.class_slot(field).unwrap();
            assert_eq!(slot.offset, offset, "{field:?}");
            assert_eq!(slot.width, Width::U32, "{field:?}");
        }
    }
}
