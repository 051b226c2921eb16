//! # Bootstrap
//!
//! Resolves the interpreted runtime's private entry points needed to turn an indirect class reference into a class
//! record.
//!
//! The shared library is opened once and never closed, so the resolved function pointers stay valid for the rest of
//! the process.

use std::ffi::c_void;

use libloading::Library;
use log::debug;
use thiserror::Error;

use crate::handle::ClassHandle;

/// Shared library of the interpreted runtime
pub const LIBRARY: &str = "libdvm.so";

/// Highest API level whose runtime exports the entry points with C linkage
pub const LAST_C_LINKAGE_LEVEL: i32 = 10;

/// `Object* dvmDecodeIndirectRef(Thread* self, jobject jobj)`
pub type DecodeIndirectRef = unsafe extern "C" fn(*mut c_void, *mut c_void) -> *mut c_void;

/// `Thread* dvmThreadSelf()`
pub type ThreadSelf = unsafe extern "C" fn() -> *mut c_void;

/// Errors while bootstrapping the interpreted runtime
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The runtime library could not be opened
    #[error("unable to open {path}")]
    LibraryNotFound {
        /// Library that was requested
        path: String,
        /// Loader error
        #[source]
        source: libloading::Error,
    },
    /// An entry point is missing from the runtime library
    #[error("symbol {name} not found")]
    SymbolNotFound {
        /// Mangled or plain symbol name
        name: &'static str,
        /// Loader error
        #[source]
        source: libloading::Error,
    },
    /// The reflection bridge could not find a helper method
    #[error("reflection method {class}.{name}{signature} not found")]
    ReflectionMethodNotFound {
        /// Internal class name
        class: &'static str,
        /// Method name
        name: &'static str,
        /// Method signature
        signature: &'static str,
    },
}

/// Names of the indirect reference decoder and the current-thread accessor for an API level.
///
/// Releases after [`LAST_C_LINKAGE_LEVEL`] export them as C++ functions.
pub fn symbol_names(api_level: i32) -> (&'static str, &'static str) {
    if api_level > LAST_C_LINKAGE_LEVEL {
        (
            "_Z20dvmDecodeIndirectRefP6ThreadP8_jobject",
            "_Z13dvmThreadSelfv",
        )
    } else {
        ("dvmDecodeIndirectRef", "dvmThreadSelf")
    }
}

/// Entry points resolved from the interpreted runtime
pub struct DalvikSymbols {
    /// Keeps the library mapped, `None` when the entry points were injected
    _library: Option<&'static Library>,
    /// `dvmDecodeIndirectRef`
    decode_indirect_ref: DecodeIndirectRef,
    /// `dvmThreadSelf`
    thread_self: ThreadSelf,
}

impl DalvikSymbols {
    /// Resolves the entry points from [`LIBRARY`]
    pub fn load(api_level: i32) -> Result<Self, BootstrapError> {
        Self::load_from(LIBRARY, api_level)
    }

    /// Resolves the entry points from the library at `path`
    pub fn load_from(path: &str, api_level: i32) -> Result<Self, BootstrapError> {
        // Safety: the interpreted runtime is already loaded into the process, so no initializers run
        let library = unsafe { Library::new(path) }.map_err(|source| BootstrapError::LibraryNotFound {
            path: path.to_owned(),
            source,
        })?;
        let (decode_name, thread_name) = symbol_names(api_level);

        // Safety: the signatures match the runtime's declarations of these entry points
        let (decode_indirect_ref, thread_self) = unsafe {
            let decode = *library
                .get::<DecodeIndirectRef>(decode_name.as_bytes())
                .map_err(|source| BootstrapError::SymbolNotFound {
                    name: decode_name,
                    source,
                })?;
            let thread = *library
                .get::<ThreadSelf>(thread_name.as_bytes())
                .map_err(|source| BootstrapError::SymbolNotFound {
                    name: thread_name,
                    source,
                })?;
            (decode, thread)
        };
        debug!("resolved {decode_name} and {thread_name} from {path}");

        Ok(Self {
            _library: Some(Box::leak(Box::new(library))),
            decode_indirect_ref,
            thread_self,
        })
    }

    /// Uses entry points obtained elsewhere
    ///
    /// # Safety
    ///
    /// Both functions must behave like the runtime's entry points of the same name for as long as the value lives
    pub unsafe fn from_raw(decode_indirect_ref: DecodeIndirectRef, thread_self: ThreadSelf) -> Self {
        Self {
            _library: None,
            decode_indirect_ref,
            thread_self,
        }
    }

    /// Decodes an indirect reference to a class object on the calling thread
    ///
    /// # Safety
    ///
    /// `reference` must be a live local or global reference to a class, valid on the calling thread
    pub unsafe fn decode(&self, reference: *mut c_void) -> Option<ClassHandle> {
        let thread = (self.thread_self)();
        ClassHandle::new((self.decode_indirect_ref)(thread, reference))
    }
}
