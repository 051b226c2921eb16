//! # Reflect
//!
//! Seam to the host's native interface, which turns managed reflection values into internal record addresses.
//!
//! Implementations wrap the JNI environment of the calling thread; this crate never talks to the runtime's
//! native interface directly.

use std::ffi::c_void;

use crate::handle::HeapRefs;

/// Managed-language reflection capabilities provided by the host
pub trait Reflection: HeapRefs {
    /// A `java.lang.reflect.Method` value
    type Method;
    /// A `java.lang.reflect.Field` value
    type Field;
    /// Identifier of a method that can be invoked reflectively
    type MethodId: Copy;

    /// Internal method record behind a reflected method (`FromReflectedMethod`)
    fn method_address(&self, method: &Self::Method) -> *mut c_void;

    /// Internal field record behind a reflected field (`FromReflectedField`)
    fn field_address(&self, field: &Self::Field) -> *mut c_void;

    /// Looks up an instance method by class name, method name and signature
    fn method_id(&self, class: &str, name: &str, signature: &str) -> Option<Self::MethodId>;

    /// Invokes an object-returning method on a reflected method value and returns the result as an indirect
    /// reference
    fn call_object_method(&self, receiver: &Self::Method, method: Self::MethodId) -> *mut c_void;
}

/// `java.lang.reflect.Method`
pub const METHOD_CLASS: &str = "java/lang/reflect/Method";
/// `Method.getDeclaringClass`
pub const GET_DECLARING_CLASS: &str = "getDeclaringClass";
/// Signature of `Method.getDeclaringClass`
pub const GET_DECLARING_CLASS_SIGNATURE: &str = "()Ljava/lang/Class;";
