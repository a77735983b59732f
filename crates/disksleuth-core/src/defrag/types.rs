//! Cluster-addressing primitives shared across the engine.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A logical cluster number: an absolute cluster address on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lcn(pub u64);

/// A virtual cluster number: a cluster offset within a single file's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vcn(pub u64);

/// A cluster count/length, always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClusterCount(pub u64);

macro_rules! impl_cluster_arith {
    ($t:ty) => {
        impl Add<ClusterCount> for $t {
            type Output = $t;
            fn add(self, rhs: ClusterCount) -> $t {
                <$t>::new(self.0 + rhs.0)
            }
        }
        impl AddAssign<ClusterCount> for $t {
            fn add_assign(&mut self, rhs: ClusterCount) {
                self.0 += rhs.0;
            }
        }
        impl Sub<ClusterCount> for $t {
            type Output = $t;
            fn sub(self, rhs: ClusterCount) -> $t {
                <$t>::new(self.0 - rhs.0)
            }
        }
        impl SubAssign<ClusterCount> for $t {
            fn sub_assign(&mut self, rhs: ClusterCount) {
                self.0 -= rhs.0;
            }
        }
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

impl Lcn {
    pub const fn new(v: u64) -> Self {
        Lcn(v)
    }

    /// The one-past-the-end address of a run of `len` clusters starting here.
    pub fn end(self, len: ClusterCount) -> Lcn {
        Lcn(self.0 + len.0)
    }
}

impl Vcn {
    pub const fn new(v: u64) -> Self {
        Vcn(v)
    }

    pub fn end(self, len: ClusterCount) -> Vcn {
        Vcn(self.0 + len.0)
    }
}

impl ClusterCount {
    pub const ZERO: ClusterCount = ClusterCount(0);

    pub const fn new(v: u64) -> Self {
        ClusterCount(v)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for ClusterCount {
    type Output = ClusterCount;
    fn add(self, rhs: ClusterCount) -> ClusterCount {
        ClusterCount(self.0 + rhs.0)
    }
}

impl AddAssign for ClusterCount {
    fn add_assign(&mut self, rhs: ClusterCount) {
        self.0 += rhs.0;
    }
}

impl Sub for ClusterCount {
    type Output = ClusterCount;
    fn sub(self, rhs: ClusterCount) -> ClusterCount {
        ClusterCount(self.0.saturating_sub(rhs.0))
    }
}

impl_cluster_arith!(Lcn);
impl_cluster_arith!(Vcn);

impl fmt::Display for ClusterCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Minimum cluster count that a region must have to be considered
/// "not a micro region" when packing small fragmented files (see
/// `tasks::walk_free_regions`).
pub const MIN_USEFUL_REGION_LENGTH: u64 = 2;

/// Cap on the number of candidate files probed for the `Locked` condition
/// inside `count_movable_clusters`, bounding pre-optimization latency.
pub const MAGIC_LOCK_PROBE: usize = 100;
