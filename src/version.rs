//! # Version
//!
//! Maps a runtime family and API level onto one of the supported record layouts

use std::collections::BTreeMap;
use std::fmt;

use lazy_static::lazy_static;
use log::warn;

use crate::layout::LayoutShape;

/// Which managed runtime is hosting the process
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RuntimeFamily {
    /// The interpreted runtime; one layout, bootstrapped from `libdvm.so`
    Dalvik,
    /// The ahead-of-time/just-in-time runtime; layout chosen by API level
    Art,
}

impl RuntimeFamily {
    /// Detects the family from the `java.vm.version` property. The layered runtime reports 2.x.
    pub fn from_vm_version(vm_version: &str) -> Self {
        if vm_version.starts_with('2') {
            RuntimeFamily::Art
        } else {
            RuntimeFamily::Dalvik
        }
    }

    /// Family from the boundary's `is_art` flag
    pub fn from_is_art(is_art: bool) -> Self {
        if is_art {
            RuntimeFamily::Art
        } else {
            RuntimeFamily::Dalvik
        }
    }
}

impl fmt::Display for RuntimeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeFamily::Dalvik => f.write_str("dalvik"),
            RuntimeFamily::Art => f.write_str("art"),
        }
    }
}

/// Newest API level whose layout is known to match [`LayoutShape::Nougat`]
pub const NEWEST_KNOWN_LEVEL: i32 = 24;

lazy_static! {
    /// Lowest API level of each layered-runtime layout revision
    static ref ART_REVISIONS: BTreeMap<i32, LayoutShape> = {
        let mut revisions = BTreeMap::new();
        revisions.insert(i32::MIN, LayoutShape::Kitkat);
        revisions.insert(20, LayoutShape::Lollipop);
        revisions.insert(22, LayoutShape::LollipopMr1);
        revisions.insert(23, LayoutShape::Marshmallow);
        revisions.insert(24, LayoutShape::Nougat);
        revisions
    };
}

/// Picks the layout for a runtime.
///
/// Levels past the newest known revision are served by the newest layout. This is not validated:
/// a runtime that changed its records again will be corrupted rather than rejected.
pub fn resolve(family: RuntimeFamily, api_level: i32) -> LayoutShape {
    match family {
        RuntimeFamily::Dalvik => LayoutShape::Dalvik,
        RuntimeFamily::Art => {
            if api_level > NEWEST_KNOWN_LEVEL {
                warn!(
                    "api level {} is newer than the newest known layout, assuming {}",
                    api_level,
                    LayoutShape::Nougat
                );
            }
            ART_REVISIONS
                .range(..=api_level)
                .next_back()
                .map(|(_, shape)| *shape)
                .unwrap_or(LayoutShape::Kitkat)
        }
    }
}
