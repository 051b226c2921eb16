//! # Access flags
//!
//! Access-flag word shared by method and field records of both runtime families

use bitflags::bitflags;

bitflags! {
    /// Access flags stored in method and field records. The low 16 bits are defined by the dex format,
    /// the upper bits are private to the runtime and are carried through untouched.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct AccessFlags: u32 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only to the defining class
        const PRIVATE = 0x0002;
        /// Visible to the package and subclasses
        const PROTECTED = 0x0004;
        /// Member belongs to the class rather than an instance
        const STATIC = 0x0008;
        /// Not overridable / not assignable after construction
        const FINAL = 0x0010;
        /// Method is synchronized
        const SYNCHRONIZED = 0x0020;
        /// Field is volatile, or method is a bridge
        const VOLATILE = 0x0040;
        /// Field is transient, or method takes varargs
        const TRANSIENT = 0x0080;
        /// Method is implemented natively
        const NATIVE = 0x0100;
        /// Class is an interface
        const INTERFACE = 0x0200;
        /// Method has no implementation
        const ABSTRACT = 0x0400;
        /// Strict floating point
        const STRICT = 0x0800;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// Annotation type
        const ANNOTATION = 0x2000;
        /// Enum type or constant
        const ENUM = 0x4000;
        /// Constructor method
        const CONSTRUCTOR = 0x1_0000;
    }
}

impl AccessFlags {
    /// Makes a member reachable from any class: clears [`AccessFlags::PRIVATE`] and sets [`AccessFlags::PUBLIC`].
    /// Every other bit, known or not, is kept.
    pub fn lifted(self) -> Self {
        (self - Self::PRIVATE) | Self::PUBLIC
    }

    /// Builds flags from a raw access word without dropping runtime-private bits
    pub fn from_word(word: u32) -> Self {
        Self::from_bits_retain(word)
    }
}

#[cfg(test)]
mod tests {
    use super::AccessFlags;

    #[test]
    /// Private members become public
    fn test_lift_private() {
        let flags = AccessFlags::PRIVATE | AccessFlags::FINAL;
        assert_eq!(flags.lifted(), AccessFlags::PUBLIC | AccessFlags::FINAL);
    }

    #[test]
    /// Bits outside the known set survive a lift
    fn test_lift_keeps_runtime_bits() {
        let flags = AccessFlags::from_word(0x8000_0002);
        assert_eq!(flags.lifted().bits(), 0x8000_0001);
    }

    #[test]
    /// Lifting twice is the same as lifting once
    fn test_lift_idempotent() {
        let flags = AccessFlags::from_word(0x0000_001a);
        assert_eq!(flags.lifted(), flags.lifted().lifted());
    }
}
