//! Coalesced scene dirtiness.
//!
//! Change events mark categories of scene state dirty as they arrive; the
//! frame scheduler takes the accumulated set once per frame to decide which
//! jobs to run. Taking the set clears it, whether or not any job ran.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use parking_lot::Mutex;
use tracing::trace;

use crate::id::{GeometryId, NodeId, TextureId};

/// Bit set of dirty scene categories.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DirtySet(u32);

impl DirtySet {
    pub const NONE: Self = Self(0);
    /// An entity transform or the hierarchy changed.
    pub const TRANSFORM: Self = Self(1 << 0);
    /// Geometry data or a geometry reference changed.
    pub const GEOMETRY: Self = Self(1 << 1);
    /// Material properties or texture data changed.
    pub const MATERIAL: Self = Self(1 << 2);
    /// Camera lens properties changed.
    pub const CAMERA: Self = Self(1 << 3);
    pub const ALL: Self = Self(0x00ff_ffff);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for DirtySet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtySet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DirtySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("DirtySet(NONE)");
        }
        let names = [
            (Self::TRANSFORM, "TRANSFORM"),
            (Self::GEOMETRY, "GEOMETRY"),
            (Self::MATERIAL, "MATERIAL"),
            (Self::CAMERA, "CAMERA"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "DirtySet({})", set.join(" | "))
    }
}

/// Everything marked dirty since the previous [`DirtyTracker::take`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirtySnapshot {
    pub flags: DirtySet,
    /// Geometries whose data changed, in id order.
    pub geometries: Vec<GeometryId>,
    /// Textures whose data changed, in id order.
    pub textures: Vec<TextureId>,
}

impl DirtySnapshot {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.geometries.is_empty() && self.textures.is_empty()
    }
}

#[derive(Default)]
struct Pending {
    flags: DirtySet,
    geometries: BTreeSet<GeometryId>,
    textures: BTreeSet<TextureId>,
}

/// Thread-safe accumulator of dirty flags.
#[derive(Default)]
pub struct DirtyTracker {
    pending: Mutex<Pending>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `flags` dirty on behalf of `source`.
    pub fn mark_dirty(&self, flags: DirtySet, source: NodeId) {
        trace!("{:?} marked dirty by {}", flags, source);
        self.pending.lock().flags |= flags;
    }

    /// Records new data for a geometry and marks geometry dirty.
    pub fn mark_geometry(&self, geometry: GeometryId) {
        let mut pending = self.pending.lock();
        pending.flags |= DirtySet::GEOMETRY;
        pending.geometries.insert(geometry);
    }

    /// Records new data for a texture and marks materials dirty.
    pub fn mark_texture(&self, texture: TextureId) {
        let mut pending = self.pending.lock();
        pending.flags |= DirtySet::MATERIAL;
        pending.textures.insert(texture);
    }

    /// Current flags, without clearing them.
    pub fn peek(&self) -> DirtySet {
        self.pending.lock().flags
    }

    /// Returns and clears everything accumulated so far.
    pub fn take(&self) -> DirtySnapshot {
        let mut pending = self.pending.lock();
        let taken = std::mem::take(&mut *pending);
        DirtySnapshot {
            flags: taken.flags,
            geometries: taken.geometries.into_iter().collect(),
            textures: taken.textures.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_coalesce() {
        let tracker = DirtyTracker::new();
        tracker.mark_dirty(DirtySet::TRANSFORM, NodeId(1));
        tracker.mark_dirty(DirtySet::TRANSFORM, NodeId(2));
        tracker.mark_geometry(GeometryId(7));
        tracker.mark_geometry(GeometryId(7));

        let snapshot = tracker.take();
        assert_eq!(snapshot.flags, DirtySet::TRANSFORM | DirtySet::GEOMETRY);
        assert_eq!(snapshot.geometries, vec![GeometryId(7)]);
    }

    #[test]
    fn test_take_clears() {
        let tracker = DirtyTracker::new();
        tracker.mark_dirty(DirtySet::ALL, NodeId(1));
        assert!(!tracker.take().is_empty());
        assert!(tracker.take().is_empty());
        assert_eq!(tracker.peek(), DirtySet::NONE);
    }

    #[test]
    fn test_all_contains_every_category() {
        for flag in [
            DirtySet::TRANSFORM,
            DirtySet::GEOMETRY,
            DirtySet::MATERIAL,
            DirtySet::CAMERA,
        ] {
            assert!(DirtySet::ALL.contains(flag));
        }
        assert!(!DirtySet::TRANSFORM.intersects(DirtySet::GEOMETRY | DirtySet::CAMERA));
    }

    #[test]
    fn test_debug_lists_flags() {
        let set = DirtySet::TRANSFORM | DirtySet::CAMERA;
        assert_eq!(format!("{set:?}"), "DirtySet(TRANSFORM | CAMERA)");
    }
}
