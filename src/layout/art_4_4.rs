//! Record layout of the layered runtime up to API level 19.
//!
//! This revision only ever shipped on 32-bit targets, so every pointer is stored as a `u32`.

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
    /// Class def index, stored in a full word
    pub dex_class_def_idx: i32,
    /// Type index, stored in a full word
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
    /// Initialized static storage of the declaring class's dex cache
    pub dex_cache_initialized_static_storage: u32,
    /// Resolved methods of the declaring class's dex cache
    pub dex_cache_resolved_methods: u32,
    /// Resolved types of the declaring class's dex cache
    pub dex_cache_resolved_types: u32,
    /// Resolved strings of the declaring class's dex cache
    pub dex_cache_strings: u32,
    /// Access flags
    pub access_flags: u32,
    /// Code item offset
    pub code_item_offset: u32,
    /// Core callee saves
    pub core_spill_mask: u32,
    /// Compiled code entry
    pub entry_point_from_compiled_code: u32,
    /// Interpreter entry
    pub entry_point_from_interpreter: u32,
    /// Floating point callee saves
    pub fp_spill_mask: u32,
    /// Frame size
    pub frame_size_in_bytes: u32,
    /// GC map
    pub gc_map: u32,
    /// Pc mapping table
    pub mapping_table: u32,
    /// Method id index
    pub method_dex_index: u32,
    /// Dispatch table index
    pub method_index: u32,
    /// Registered native code
    pub native_method: u32,
    /// Vmap table
    pub vmap_table: u32,
}

/// Overlay order for `ArtMethod`
const OVERLAY: &[MethodField] = &[
    MethodField::DeclaringClass,
    MethodField::AccessFlags,
    MethodField::FrameSizeInBytes,
    MethodField::DexCacheInitializedStaticStorage,
    MethodField::DexCacheResolvedTypes,
    MethodField::DexCacheResolvedMethods,
    MethodField::DexCacheStrings,
    MethodField::VmapTable,
    MethodField::CoreSpillMask,
    MethodField::FpSpillMask,
    MethodField::MappingTable,
    MethodField::GcMap,
    MethodField::DexCodeItemOffset,
    MethodField::EntryPointFromQuickCompiledCode,
    MethodField::EntryPointFromInterpreter,
    MethodField::EntryPointFromJni,
    MethodField::MethodIndex,
    MethodField::DexMethodIndex,
];

/// Class bookkeeping order
const FIXUPS: &[ClassFixup] = &[
    ClassFixup::ClassLoader,
    ClassFixup::ClinitThreadId,
    ClassFixup::Status,
    ClassFixup::ClearSuperClass,
];

/// Layout of the layered runtime, API level 19 and below
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct KitkatLayout;

impl Layout for KitkatLayout {
    fn shape(&self) -> LayoutShape {
        LayoutShape::Kitkat
    }

    fn method_slot(&self, field: MethodField) -> Option<Slot> {
        let offset = match field {
            MethodField::DeclaringClass => offset_of!(ArtMethod, declaring_class),
            MethodField::AccessFlags => offset_of!(ArtMethod, access_flags),
            MethodField::DexCodeItemOffset => offset_of!(ArtMethod, code_item_offset),
            MethodField::DexMethodIndex => offset_of!(ArtMethod, method_dex_index),
            MethodField::MethodIndex => offset_of!(ArtMethod, method_index),
            MethodField::DexCacheResolvedMethods => {
                offset_of!(ArtMethod, dex_cache_resolved_methods)
            }
            MethodField::DexCacheResolvedTypes => offset_of!(ArtMethod, dex_cache_resolved_types),
            MethodField::DexCacheStrings => offset_of!(ArtMethod, dex_cache_strings),
            MethodField::DexCacheInitializedStaticStorage => {
                offset_of!(ArtMethod, dex_cache_initialized_static_storage)
            }
            MethodField::EntryPointFromInterpreter => {
                offset_of!(ArtMethod, entry_point_from_interpreter)
            }
            MethodField::EntryPointFromJni => offset_of!(ArtMethod, native_method),
            MethodField::EntryPointFromQuickCompiledCode => {
                offset_of!(ArtMethod, entry_point_from_compiled_code)
            }
            MethodField::GcMap => offset_of!(ArtMethod, gc_map),
            MethodField::MappingTable => offset_of!(ArtMethod, mapping_table),
            MethodField::VmapTable => offset_of!(ArtMethod, vmap_table),
            MethodField::CoreSpillMask => offset_of!(ArtMethod, core_spill_mask),
            MethodField::FpSpillMask => offset_of!(ArtMethod, fp_spill_mask),
            MethodField::FrameSizeInBytes => offset_of!(ArtMethod, frame_size_in_bytes),
            _ => return None,
        };
        Some(Slot::new(offset, Width::U32))
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
