//! # Runtime
//!
//! The configured patching context: which runtime family and revision the process runs, how records are written,
//! and how reflected values map onto records.
//!
//! A [`Runtime`] is built once, before any method is replaced, and is immutable afterwards. Operations that need the
//! configuration take it by reference, so nothing can run unconfigured.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};
use thiserror::Error;

use crate::access::AccessFlags;
use crate::bootstrap::{BootstrapError, DalvikSymbols};
use crate::handle::{FieldHandle, MethodHandle};
use crate::layout::{dalvik, Layout, LayoutShape};
use crate::overlay::{MethodOverlay, OverlayError, Role};
use crate::patcher::byte::BytePatcher;
use crate::patcher::Patcher;
use crate::reflect::{Reflection, GET_DECLARING_CLASS, GET_DECLARING_CLASS_SIGNATURE, METHOD_CLASS};
use crate::version::{self, RuntimeFamily};
use crate::visibility::FieldVisibility;

/// Errors while configuring a [`Runtime`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The interpreted runtime's entry points could not be resolved
    #[error("interpreted runtime bootstrap failed")]
    Bootstrap(#[from] BootstrapError),
}

/// Errors raised by [`Runtime`] operations
#[derive(Debug, Error)]
pub enum RuntimeError<E> {
    /// A reflected method has no internal record
    #[error("{0} method resolved to a null record")]
    NullMethod(Role),
    /// A reflected field has no internal record
    #[error("field resolved to a null record")]
    NullField,
    /// The replacement's declaring class could not be decoded
    #[error("declaring class of the replacement resolved to null")]
    NullClass,
    /// The overlay itself failed
    #[error("{0}")]
    Overlay(OverlayError<E>),
    /// Writing a field record failed
    #[error("{0}")]
    Patch(E),
}

impl<E> From<OverlayError<E>> for RuntimeError<E> {
    fn from(e: OverlayError<E>) -> Self {
        Self::Overlay(e)
    }
}

/// Lifecycle of a [`Runtime`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    /// A layout is selected but no record was written yet
    Configured,
    /// At least one record was modified
    Active,
}

/// Extra state the interpreted runtime needs to mark classes initialized
struct DalvikSupport<M> {
    /// Resolved runtime entry points
    symbols: DalvikSymbols,
    /// `Method.getDeclaringClass`
    get_declaring_class: M,
}

/// Configured patching context for the running process
pub struct Runtime<R: Reflection, P: Patcher = BytePatcher> {
    /// Host reflection bridge
    bridge: R,
    /// Writes into runtime records
    patcher: P,
    /// Selected record layout
    layout: &'static dyn Layout,
    /// Present on the interpreted runtime only
    dalvik: Option<DalvikSupport<R::MethodId>>,
    /// Set after the first successful write
    active: AtomicBool,
}

impl<R: Reflection> Runtime<R> {
    /// Configures a runtime that writes records in place
    pub fn configure(bridge: R, family: RuntimeFamily, api_level: i32) -> Result<Self, ConfigError> {
        Self::configure_with(bridge, BytePatcher::new(), family, api_level)
    }

    /// Configures a runtime, reporting success as a boolean-style result and logging the reason for failure
    pub fn setup(bridge: R, is_art: bool, api_level: i32) -> Option<Self> {
        match Self::configure(bridge, RuntimeFamily::from_is_art(is_art), api_level) {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                error!("setup failed: {e}");
                None
            }
        }
    }
}

impl<R: Reflection, P: Patcher> Runtime<R, P> {
    /// Configures a runtime with a custom patcher.
    ///
    /// The interpreted family loads its entry points from the runtime library at this point.
    pub fn configure_with(
        bridge: R,
        patcher: P,
        family: RuntimeFamily,
        api_level: i32,
    ) -> Result<Self, ConfigError> {
        match family {
            RuntimeFamily::Dalvik => {
                let symbols = DalvikSymbols::load(api_level)?;
                Self::configure_dalvik(bridge, patcher, symbols)
            }
            RuntimeFamily::Art => {
                let shape = version::resolve(family, api_level);
                info!("configured {shape} for API level {api_level}");
                Ok(Self::new(bridge, patcher, shape, None))
            }
        }
    }

    /// Configures the interpreted runtime with already resolved entry points
    pub fn configure_dalvik(bridge: R, patcher: P, symbols: DalvikSymbols) -> Result<Self, ConfigError> {
        let get_declaring_class = bridge
            .method_id(METHOD_CLASS, GET_DECLARING_CLASS, GET_DECLARING_CLASS_SIGNATURE)
            .ok_or(BootstrapError::ReflectionMethodNotFound {
                class: METHOD_CLASS,
                name: GET_DECLARING_CLASS,
                signature: GET_DECLARING_CLASS_SIGNATURE,
            })?;
        info!("configured {}", LayoutShape::Dalvik);
        Ok(Self::new(
            bridge,
            patcher,
            LayoutShape::Dalvik,
            Some(DalvikSupport {
                symbols,
                get_declaring_class,
            }),
        ))
    }

    /// Assembles a configured runtime
    fn new(bridge: R, patcher: P, shape: LayoutShape, dalvik: Option<DalvikSupport<R::MethodId>>) -> Self {
        Self {
            bridge,
            patcher,
            layout: shape.layout(),
            dalvik,
            active: AtomicBool::new(false),
        }
    }

    /// Selected layout
    pub fn layout(&self) -> &'static dyn Layout {
        self.layout
    }

    /// Selected layout shape
    pub fn shape(&self) -> LayoutShape {
        self.layout.shape()
    }

    /// Reflection bridge
    pub fn bridge(&self) -> &R {
        &self.bridge
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        if self.active.load(Ordering::Relaxed) {
            State::Active
        } else {
            State::Configured
        }
    }

    /// Makes every future call to `original` run `replacement`'s code.
    ///
    /// On the interpreted runtime the replacement's class is marked initialized first, so calls routed into it never
    /// trigger class initialization from inside the original's frame.
    ///
    /// # Safety
    ///
    /// Both values must reflect live methods of the running process, the configured layout must match the runtime,
    /// and no thread may be executing either method concurrently. The change cannot be undone.
    pub unsafe fn replace(
        &self,
        original: &R::Method,
        replacement: &R::Method,
    ) -> Result<(), RuntimeError<P::Error>> {
        let original_handle = MethodHandle::new(self.bridge.method_address(original))
            .ok_or(RuntimeError::NullMethod(Role::Original))?;
        let replacement_handle = MethodHandle::new(self.bridge.method_address(replacement))
            .ok_or(RuntimeError::NullMethod(Role::Replacement))?;
        let engine = MethodOverlay::new(self.layout, &self.patcher, &self.bridge);

        if let Some(support) = &self.dalvik {
            let reference = self
                .bridge
                .call_object_method(replacement, support.get_declaring_class);
            let class = support
                .symbols
                .decode(reference)
                .ok_or(RuntimeError::NullClass)?;
            engine.mark_initialized(class, dalvik::CLASS_INITIALIZED)?;
        }

        engine.overlay(original_handle, replacement_handle)?;
        self.active.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Lifts the visibility of one reflected field to public
    ///
    /// # Safety
    ///
    /// `field` must reflect a live field of the running process and the configured layout must match the runtime
    pub unsafe fn lift_field_visibility(&self, field: &R::Field) -> Result<AccessFlags, RuntimeError<P::Error>> {
        let handle = FieldHandle::new(self.bridge.field_address(field)).ok_or(RuntimeError::NullField)?;
        let flags = FieldVisibility::new(self.layout, &self.patcher)
            .lift(handle)
            .map_err(RuntimeError::Patch)?;
        self.active.store(true, Ordering::Relaxed);
        Ok(flags)
    }

    /// Lifts the visibility of every given field, typically all fields declared by a replaced class.
    ///
    /// Stops at the first failure; fields before it stay lifted.
    ///
    /// # Safety
    ///
    /// See [`Runtime::lift_field_visibility`]
    pub unsafe fn lift_class_visibility(&self, fields: &[R::Field]) -> Result<(), RuntimeError<P::Error>> {
        for field in fields {
            self.lift_field_visibility(field)?;
        }
        Ok(())
    }
}

impl<R: Reflection, P: Patcher> Runtime<R, P>
where
    P::Error: fmt::Display,
{
    /// Like [`Runtime::replace`], logging failures instead of returning them
    ///
    /// # Safety
    ///
    /// See [`Runtime::replace`]
    pub unsafe fn replace_method(&self, original: &R::Method, replacement: &R::Method) {
        if let Err(e) = self.replace(original, replacement) {
            error!("replace_method failed: {e}");
        }
    }

    /// Like [`Runtime::lift_field_visibility`], logging failures instead of returning them
    ///
    /// # Safety
    ///
    /// See [`Runtime::lift_field_visibility`]
    pub unsafe fn set_field_flag(&self, field: &R::Field) {
        if let Err(e) = self.lift_field_visibility(field) {
            error!("set_field_flag failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;
    use std::ptr;

    use super::{ConfigError, Runtime, RuntimeError, State};
    use crate::access::AccessFlags;
    use crate::bootstrap::{BootstrapError, DalvikSymbols};
    use crate::handle::{ClassHandle, HeapRefs};
    use crate::layout::{dalvik, ClassField, LayoutShape, MethodField};
    use crate::overlay::Role;
    use crate::patcher::byte::BytePatcher;
    use crate::patcher::mem::PermissionWrapper;
    use crate::reflect::{Reflection, GET_DECLARING_CLASS, METHOD_CLASS};
    use crate::testing::{FakeHeap, Record};
    use crate::version::RuntimeFamily;

    /// Reflected method in the mock bridge
    struct MockMethod {
        /// Internal record
        record: *mut u8,
        /// Indirect reference returned by `getDeclaringClass`
        declaring_class: *mut c_void,
    }

    impl MockMethod {
        /// Reflects `record`, declared by `class`
        fn new(record: &Record, class: Option<&Record>) -> Self {
            Self {
                record: record.ptr(),
                declaring_class: class.map_or(ptr::null_mut(), |c| c.ptr() as *mut c_void),
            }
        }
    }

    /// Reflection bridge over test records
    #[derive(Default)]
    struct MockBridge {
        /// Decodes class references in method records
        heap: FakeHeap,
        /// Whether `Method.getDeclaringClass` can be found
        has_reflection: bool,
    }

    impl HeapRefs for MockBridge {
        fn decode(&self, reference: u64) -> Option<ClassHandle> {
            self.heap.decode(reference)
        }
    }

    impl Reflection for MockBridge {
        type Method = MockMethod;
        type Field = *mut u8;
        type MethodId = u32;

        fn method_address(&self, method: &MockMethod) -> *mut c_void {
            method.record as *mut c_void
        }

        fn field_address(&self, field: &*mut u8) -> *mut c_void {
            *field as *mut c_void
        }

        fn method_id(&self, class: &str, name: &str, _signature: &str) -> Option<u32> {
            (self.has_reflection && class == METHOD_CLASS && name == GET_DECLARING_CLASS).then_some(7)
        }

        fn call_object_method(&self, receiver: &MockMethod, method: u32) -> *mut c_void {
            assert_eq!(method, 7);
            receiver.declaring_class
        }
    }

    /// Indirect references are the class record addresses themselves
    unsafe extern "C" fn decode_indirect_ref(_thread: *mut c_void, reference: *mut c_void) -> *mut c_void {
        reference
    }

    /// Single fake thread
    unsafe extern "C" fn thread_self() -> *mut c_void {
        0x1 as *mut c_void
    }

    #[test]
    /// API levels map onto layered layouts without touching any library
    fn test_configure_art() {
        for (level, shape) in [
            (19, LayoutShape::Kitkat),
            (21, LayoutShape::Lollipop),
            (22, LayoutShape::LollipopMr1),
            (23, LayoutShape::Marshmallow),
            (25, LayoutShape::Nougat),
        ] {
            let runtime = Runtime::configure(MockBridge::default(), RuntimeFamily::Art, level).unwrap();
            assert_eq!(runtime.shape(), shape);
            assert_eq!(runtime.state(), State::Configured);
        }
    }

    #[test]
    /// Without the interpreted runtime library, configuring for it fails
    fn test_configure_dalvik_without_library() {
        let result = Runtime::configure(MockBridge::default(), RuntimeFamily::Dalvik, 19);
        assert!(matches!(
            result,
            Err(ConfigError::Bootstrap(BootstrapError::LibraryNotFound { .. }))
        ));
        assert!(Runtime::setup(MockBridge::default(), false, 19).is_none());
        assert!(Runtime::setup(MockBridge::default(), true, 19).is_some());
    }

    #[test]
    /// The reflection helper must be available on the interpreted runtime
    fn test_configure_dalvik_without_reflection() {
        let symbols = unsafe { DalvikSymbols::from_raw(decode_indirect_ref, thread_self) };
        let result = Runtime::configure_dalvik(MockBridge::default(), BytePatcher::new(), symbols);
        assert!(matches!(
            result,
            Err(ConfigError::Bootstrap(BootstrapError::ReflectionMethodNotFound { .. }))
        ));
    }

    #[test]
    /// Replacing on the layered runtime overlays the record and activates the runtime
    fn test_replace_art() {
        let layout = LayoutShape::Nougat.layout();
        let class_slot = layout.method_slot(MethodField::DeclaringClass).unwrap();
        let quick = layout
            .method_slot(MethodField::EntryPointFromQuickCompiledCode)
            .unwrap();

        let mut original = Record::new();
        let mut replacement = Record::new();
        let original_class = Record::new();
        let replacement_class = Record::new();
        original.store(class_slot, 0x10);
        replacement.store(class_slot, 0x20);
        original.store(quick, 0x1000);
        replacement.store(quick, 0x2000);

        let mut bridge = MockBridge::default();
        bridge.heap.register(0x10, &original_class);
        bridge.heap.register(0x20, &replacement_class);
        let runtime = Runtime::configure(bridge, RuntimeFamily::Art, 24).unwrap();

        unsafe {
            runtime
                .replace(
                    &MockMethod::new(&original, None),
                    &MockMethod::new(&replacement, None),
                )
                .unwrap()
        };
        assert_eq!(original.load(quick), 0x2000);
        assert_eq!(original.load(class_slot), 0x20);
        assert_eq!(runtime.state(), State::Active);
    }

    #[test]
    /// A method without a record leaves the runtime untouched
    fn test_replace_null_method() {
        let replacement = Record::new();
        let runtime = Runtime::configure(MockBridge::default(), RuntimeFamily::Art, 23).unwrap();
        let original = MockMethod {
            record: ptr::null_mut(),
            declaring_class: ptr::null_mut(),
        };
        let result = unsafe { runtime.replace(&original, &MockMethod::new(&replacement, None)) };
        assert!(matches!(result, Err(RuntimeError::NullMethod(Role::Original))));
        assert_eq!(runtime.state(), State::Configured);

        unsafe { runtime.replace_method(&original, &MockMethod::new(&replacement, None)) };
        assert_eq!(runtime.state(), State::Configured);
    }

    #[test]
    /// On the interpreted runtime the replacement's class is marked initialized before the overlay
    fn test_replace_dalvik() {
        let layout = LayoutShape::Dalvik.layout();
        let status = layout.class_slot(ClassField::Status).unwrap();
        let insns = layout.method_slot(MethodField::Insns).unwrap();

        let mut original = Record::new();
        let mut replacement = Record::new();
        let mut replacement_class = Record::new();
        original.store(insns, 0x1000);
        replacement.store(insns, 0x2000);
        replacement_class.store(status, 3);

        let symbols = unsafe { DalvikSymbols::from_raw(decode_indirect_ref, thread_self) };
        let bridge = MockBridge {
            has_reflection: true,
            ..MockBridge::default()
        };
        let runtime = Runtime::configure_dalvik(bridge, BytePatcher::new(), symbols).unwrap();
        assert_eq!(runtime.shape(), LayoutShape::Dalvik);

        unsafe {
            runtime
                .replace(
                    &MockMethod::new(&original, None),
                    &MockMethod::new(&replacement, Some(&replacement_class)),
                )
                .unwrap()
        };
        assert_eq!(replacement_class.load(status), dalvik::CLASS_INITIALIZED as u64);
        assert_eq!(original.load(insns), 0x2000);
        assert_eq!(runtime.state(), State::Active);
    }

    #[test]
    /// A replacement whose class cannot be recovered is rejected before any write
    fn test_replace_dalvik_null_class() {
        let layout = LayoutShape::Dalvik.layout();
        let insns = layout.method_slot(MethodField::Insns).unwrap();
        let mut original = Record::new();
        let mut replacement = Record::new();
        original.store(insns, 0x1000);
        replacement.store(insns, 0x2000);

        let symbols = unsafe { DalvikSymbols::from_raw(decode_indirect_ref, thread_self) };
        let bridge = MockBridge {
            has_reflection: true,
            ..MockBridge::default()
        };
        let runtime = Runtime::configure_dalvik(bridge, BytePatcher::new(), symbols).unwrap();
        let result = unsafe {
            runtime.replace(
                &MockMethod::new(&original, None),
                &MockMethod::new(&replacement, None),
            )
        };
        assert!(matches!(result, Err(RuntimeError::NullClass)));
        assert_eq!(original.load(insns), 0x1000);
    }

    #[test]
    /// Every field of a class becomes public
    fn test_lift_class_visibility() {
        let layout = LayoutShape::Marshmallow.layout();
        let slot = layout.field_access_flags();
        let mut first = Record::new();
        let mut second = Record::new();
        first.store(slot, (AccessFlags::PRIVATE | AccessFlags::FINAL).bits() as u64);
        second.store(slot, AccessFlags::PROTECTED.bits() as u64);

        let runtime = Runtime::configure(MockBridge::default(), RuntimeFamily::Art, 23).unwrap();
        unsafe { runtime.lift_class_visibility(&[first.ptr(), second.ptr()]).unwrap() };
        assert_eq!(
            first.load(slot),
            (AccessFlags::PUBLIC | AccessFlags::FINAL).bits() as u64
        );
        assert_eq!(
            second.load(slot),
            (AccessFlags::PUBLIC | AccessFlags::PROTECTED).bits() as u64
        );
        assert_eq!(runtime.state(), State::Active);

        let result = unsafe { runtime.lift_field_visibility(&ptr::null_mut()) };
        assert!(matches!(result, Err(RuntimeError::NullField)));
        unsafe { runtime.set_field_flag(&ptr::null_mut()) };
    }

    #[test]
    /// Records behind a permission-adjusting patcher are written the same way
    fn test_permission_wrapper() {
        let layout = LayoutShape::LollipopMr1.layout();
        let slot = layout.field_access_flags();
        let mut field = Record::new();
        field.store(slot, AccessFlags::PRIVATE.bits() as u64);

        let patcher = PermissionWrapper::<BytePatcher>::default();
        let runtime =
            Runtime::configure_with(MockBridge::default(), patcher, RuntimeFamily::Art, 22).unwrap();
        let flags = unsafe { runtime.lift_field_visibility(&field.ptr()).unwrap() };
        assert_eq!(flags, AccessFlags::PUBLIC);
        assert_eq!(field.load(slot), AccessFlags::PUBLIC.bits() as u64);
    }
}
