//! Record layout of the interpreted runtime (`libdvm`)

use std::mem::{offset_of, size_of};

use super::{ClassField, ClassFixup, Layout, LayoutShape, MethodField, Slot, Width};

/// `ClassStatus::CLASS_INITIALIZED`
pub const CLASS_INITIALIZED: i32 = 7;

/// Header shared by every heap object
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Object {
    /// Class of the object
    pub clazz: usize,
    /// Thin lock word
    pub lock: u32,
}

/// Rust mirror of `ClassObject`
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct ClassObject {
    /// Object header
    pub header: Object,
    /// Leftover instance data of `java.lang.Class`
    pub instance_data: [u32; 4],
    /// Descriptor such as "Ljava/lang/String;"
    pub descriptor: usize,
    /// Allocated copy of the descriptor, if any
    pub descriptor_alloc: usize,
    /// Access flags
    pub access_flags: u32,
    /// Unique class serial number
    pub serial_number: u32,
    /// Dex file the class was loaded from
    pub p_dvm_dex: usize,
    /// Initialization status
    pub status: i32,
    /// Cached verification error class
    pub verify_error_class: usize,
    /// Thread running `<clinit>`
    pub init_thread_id: u32,
    /// Instance size
    pub object_size: usize,
    /// Element class for arrays
    pub element_class: usize,
    /// Array dimensions
    pub array_dim: i32,
    /// Primitive type for primitive classes
    pub primitive_type: i32,
    /// Superclass
    pub super_class: usize,
    /// Defining class loader
    pub class_loader: usize,
}

/// Rust mirror of `DexProto`
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct DexProto {
    /// Dex file the prototype is defined in
    pub dex_file: usize,
    /// Index into the dex file's proto ids
    pub proto_idx: u32,
}

/// Rust mirror of `Method`
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Method {
    /// Declaring class
    pub clazz: usize,
    /// Access flags
    pub access_flags: u32,
    /// Vtable index for virtual methods, direct method index otherwise
    pub method_index: u16,
    /// Registers used by the bytecode
    pub registers_size: u16,
    /// Outgoing argument registers
    pub outs_size: u16,
    /// Incoming argument registers
    pub ins_size: u16,
    /// Method name
    pub name: usize,
    /// Method prototype
    pub prototype: DexProto,
    /// Short-form signature
    pub shorty: usize,
    /// Bytecode
    pub insns: usize,
    /// JNI argument info
    pub jni_arg_info: i32,
    /// Native bridge
    pub native_func: usize,
    /// Fast JNI call allowed
    pub fast_jni: bool,
    /// No reference arguments
    pub no_ref: bool,
    /// Method tracing enabled
    pub should_trace: bool,
    /// Precise GC register map
    pub register_map: usize,
    /// Method is profiled
    pub in_profile: bool,
}

/// Rust mirror of `Field`
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Field {
    /// Declaring class
    pub clazz: usize,
    /// Field name
    pub name: usize,
    /// Type signature
    pub signature: usize,
    /// Access flags
    pub access_flags: u32,
}

/// Overlay order for `Method`
const OVERLAY: &[MethodField] = &[
    MethodField::DeclaringClass,
    MethodField::AccessFlags,
    MethodField::MethodIndex,
    MethodField::JniArgInfo,
    MethodField::RegistersSize,
    MethodField::OutsSize,
    MethodField::InsSize,
    MethodField::ProtoDexFile,
    MethodField::ProtoIndex,
    MethodField::Insns,
    MethodField::NativeFunc,
];

/// Layout of the interpreted runtime.
///
/// Class bookkeeping is not expressed as fixups: the replacement's class is marked initialized through
/// the bootstrap entry points instead (see [`crate::bootstrap`]).
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct DalvikLayout;

impl Layout for DalvikLayout {
    fn shape(&self) -> LayoutShape {
        LayoutShape::Dalvik
    }

    fn method_slot(&self, field: MethodField) -> Option<Slot> {
        let proto = offset_of!(Method, prototype);
        let slot = match field {
            MethodField::DeclaringClass => Slot::new(offset_of!(Method, clazz), Width::POINTER),
            MethodField::AccessFlags => Slot::new(offset_of!(Method, access_flags), Width::U32),
            MethodField::MethodIndex => Slot::new(offset_of!(Method, method_index), Width::U16),
            MethodField::RegistersSize => {
                Slot::new(offset_of!(Method, registers_size), Width::U16)
            }
            MethodField::OutsSize => Slot::new(offset_of!(Method, outs_size), Width::U16),
            MethodField::InsSize => Slot::new(offset_of!(Method, ins_size), Width::U16),
            MethodField::ProtoDexFile => {
                Slot::new(proto + offset_of!(DexProto, dex_file), Width::POINTER)
            }
            MethodField::ProtoIndex => {
                Slot::new(proto + offset_of!(DexProto, proto_idx), Width::U32)
            }
            MethodField::Insns => Slot::new(offset_of!(Method, insns), Width::POINTER),
            MethodField::JniArgInfo => Slot::new(offset_of!(Method, jni_arg_info), Width::U32),
            MethodField::NativeFunc => Slot::new(offset_of!(Method, native_func), Width::POINTER),
            _ => return None,
        };
        Some(slot)
    }

    fn class_slot(&self, field: ClassField) -> Option<Slot> {
        let slot = match field {
            ClassField::ClassLoader => {
                Slot::new(offset_of!(ClassObject, class_loader), Width::POINTER)
            }
            ClassField::SuperClass => {
                Slot::new(offset_of!(ClassObject, super_class), Width::POINTER)
            }
            ClassField::ClinitThreadId => {
                Slot::new(offset_of!(ClassObject, init_thread_id), Width::U32)
            }
            ClassField::Status => Slot::new(offset_of!(ClassObject, status), Width::U32),
        };
        Some(slot)
    }

    fn field_access_flags(&self) -> Slot {
        Slot::new(offset_of!(Field, access_flags), Width::U32)
    }

    fn overlay_fields(&self) -> &'static [MethodField] {
        OVERLAY
    }

    fn class_fixups(&self) -> &'static [ClassFixup] {
        &[]
    }

    fn method_size(&self) -> usize {
        size_of::<Method>()
    }
}
