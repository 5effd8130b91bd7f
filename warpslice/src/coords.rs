//! Coordinates in the physical (device, SM, warp, lane) and logical
//! (kernel, grid, cluster, block, thread) addressing schemes.
//!
//! A [`Coords`] is a point in a 9-dimensional space. Every axis may
//! independently be a [`Field::Wildcard`], which makes a coordinate
//! usable as a filter: see [`Coords::matches`]. Coordinates produced
//! by a query carry concrete values for the fields implied by the
//! query's [`Granularity`] and wildcards everywhere else: see
//! [`Coords::project`].
//!
//! The three 3-D logical indices additionally distinguish
//! [`Idx3::Ignore`] ("does not apply to this launch") from a wildcard
//! ("any value").

use std::fmt;

use enum_as_inner::EnumAsInner;
use serde::Deserialize;
use serde::Serialize;

/// A concrete three-component extent or index, as reported by the
/// device.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize
)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// True if no component is zero.
    pub fn has_volume(&self) -> bool {
        self.x != 0 && self.y != 0 && self.z != 0
    }

    /// The number of elements spanned by this extent.
    pub fn volume(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// A single axis of a coordinate.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumAsInner
)]
pub enum Field<T> {
    /// A concrete value.
    Value(T),

    /// Matches any value.
    Wildcard,

    /// The value of a logical field for an execution unit that is not
    /// valid. This is a concrete marker: only a wildcard or another
    /// `Invalid` matches it.
    Invalid,
}

impl<T: PartialEq> Field<T> {
    /// Returns true if `candidate` is accepted by this field used as a
    /// filter.
    pub fn matches(&self, candidate: &Field<T>) -> bool {
        self.is_wildcard() || self == candidate
    }
}

impl<T> Field<T> {
    pub(crate) fn keep(self, keep: bool) -> Self {
        if keep { self } else { Field::Wildcard }
    }
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Field::Value(value)
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Value(value) => write!(f, "{}", value),
            Field::Wildcard => write!(f, "*"),
            Field::Invalid => write!(f, "?"),
        }
    }
}

/// A 3-D logical index (cluster, block or thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Idx3 {
    /// An index whose components are each a value, a wildcard, or
    /// invalid.
    At(Field<u32>, Field<u32>, Field<u32>),

    /// The index does not apply to this launch, e.g. the cluster index
    /// of a kernel launched without clusters.
    Ignore,
}

impl Idx3 {
    pub const WILDCARD: Idx3 = Idx3::At(Field::Wildcard, Field::Wildcard, Field::Wildcard);
    pub const INVALID: Idx3 = Idx3::At(Field::Invalid, Field::Invalid, Field::Invalid);

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Idx3::At(Field::Value(x), Field::Value(y), Field::Value(z))
    }

    /// Returns true if `candidate` is accepted by this index used as a
    /// filter. Matching is per component; an ignored candidate is only
    /// accepted by a fully wildcard or an ignore filter.
    pub fn matches(&self, candidate: &Idx3) -> bool {
        match (self, candidate) {
            (Idx3::At(x, y, z), Idx3::At(cx, cy, cz)) => {
                x.matches(cx) && y.matches(cy) && z.matches(cz)
            }
            (Idx3::At(x, y, z), Idx3::Ignore) => {
                x.is_wildcard() && y.is_wildcard() && z.is_wildcard()
            }
            (Idx3::Ignore, candidate) => candidate.is_ignore(),
        }
    }

    /// True if any component is a wildcard.
    pub fn has_wildcard(&self) -> bool {
        match self {
            Idx3::At(x, y, z) => x.is_wildcard() || y.is_wildcard() || z.is_wildcard(),
            Idx3::Ignore => false,
        }
    }

    pub fn is_ignore(&self) -> bool {
        matches!(self, Idx3::Ignore)
    }

    /// The concrete index, if every component is a value.
    pub fn dim3(&self) -> Option<Dim3> {
        match self {
            Idx3::At(Field::Value(x), Field::Value(y), Field::Value(z)) => {
                Some(Dim3::new(*x, *y, *z))
            }
            _ => None,
        }
    }

    pub(crate) fn keep(self, keep: bool) -> Self {
        if keep { self } else { Idx3::WILDCARD }
    }
}

impl Default for Idx3 {
    fn default() -> Self {
        Idx3::WILDCARD
    }
}

impl From<Dim3> for Idx3 {
    fn from(dim: Dim3) -> Self {
        Idx3::new(dim.x, dim.y, dim.z)
    }
}

impl From<(u32, u32, u32)> for Idx3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Idx3::new(x, y, z)
    }
}

impl fmt::Display for Idx3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Idx3::Ignore => write!(f, "-"),
            &Idx3::WILDCARD => write!(f, "*"),
            &Idx3::INVALID => write!(f, "?"),
            Idx3::At(x, y, z) => write!(f, "({},{},{})", x, y, z),
        }
    }
}

/// The physical sub-tuple of a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalCoords {
    pub dev: Field<u32>,
    pub sm: Field<u32>,
    pub wp: Field<u32>,
    pub ln: Field<u32>,
}

impl PhysicalCoords {
    /// All fields wildcard.
    pub const fn wild() -> Self {
        Self {
            dev: Field::Wildcard,
            sm: Field::Wildcard,
            wp: Field::Wildcard,
            ln: Field::Wildcard,
        }
    }

    pub const fn new(dev: u32, sm: u32, wp: u32, ln: u32) -> Self {
        Self {
            dev: Field::Value(dev),
            sm: Field::Value(sm),
            wp: Field::Value(wp),
            ln: Field::Value(ln),
        }
    }

    pub fn matches(&self, candidate: &PhysicalCoords) -> bool {
        self.dev.matches(&candidate.dev)
            && self.sm.matches(&candidate.sm)
            && self.wp.matches(&candidate.wp)
            && self.ln.matches(&candidate.ln)
    }

    /// True if no field is a wildcard.
    pub fn is_fully_defined(&self) -> bool {
        !(self.dev.is_wildcard()
            || self.sm.is_wildcard()
            || self.wp.is_wildcard()
            || self.ln.is_wildcard())
    }
}

impl Default for PhysicalCoords {
    fn default() -> Self {
        Self::wild()
    }
}

impl fmt::Display for PhysicalCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dev{}.sm{}.wp{}.ln{}",
            self.dev, self.sm, self.wp, self.ln
        )
    }
}

/// The logical sub-tuple of a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalCoords {
    /// Unique per debugging session.
    pub kernel_id: Field<u64>,
    /// Unique per device.
    pub grid_id: Field<u64>,
    pub cluster_idx: Idx3,
    pub block_idx: Idx3,
    pub thread_idx: Idx3,
}

impl LogicalCoords {
    /// All fields wildcard.
    pub const fn wild() -> Self {
        Self {
            kernel_id: Field::Wildcard,
            grid_id: Field::Wildcard,
            cluster_idx: Idx3::WILDCARD,
            block_idx: Idx3::WILDCARD,
            thread_idx: Idx3::WILDCARD,
        }
    }

    pub fn matches(&self, candidate: &LogicalCoords) -> bool {
        self.kernel_id.matches(&candidate.kernel_id)
            && self.grid_id.matches(&candidate.grid_id)
            && self.cluster_idx.matches(&candidate.cluster_idx)
            && self.block_idx.matches(&candidate.block_idx)
            && self.thread_idx.matches(&candidate.thread_idx)
    }

    /// True if no field (or 3-D component) is a wildcard.
    pub fn is_fully_defined(&self) -> bool {
        !(self.kernel_id.is_wildcard()
            || self.grid_id.is_wildcard()
            || self.cluster_idx.has_wildcard()
            || self.block_idx.has_wildcard()
            || self.thread_idx.has_wildcard())
    }
}

impl Default for LogicalCoords {
    fn default() -> Self {
        Self::wild()
    }
}

impl fmt::Display for LogicalCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kernel{}.grid{}.cluster{}.block{}.thread{}",
            self.kernel_id, self.grid_id, self.cluster_idx, self.block_idx, self.thread_idx
        )
    }
}

/// A point in the combined physical and logical coordinate space.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize
)]
pub struct Coords {
    pub physical: PhysicalCoords,
    pub logical: LogicalCoords,
}

impl Coords {
    /// The coordinate with every field wildcard. As a filter it
    /// matches everything.
    pub const fn wild() -> Self {
        Self {
            physical: PhysicalCoords::wild(),
            logical: LogicalCoords::wild(),
        }
    }

    pub fn new(physical: PhysicalCoords, logical: LogicalCoords) -> Self {
        Self { physical, logical }
    }

    /// Returns true if every field of `candidate` is accepted by the
    /// corresponding field of `self`.
    pub fn matches(&self, candidate: &Coords) -> bool {
        self.physical.matches(&candidate.physical) && self.logical.matches(&candidate.logical)
    }

    /// Projects this coordinate down to `granularity`: fields the
    /// granularity does not imply become wildcards. The device is
    /// always kept.
    pub fn project(&self, granularity: Granularity) -> Coords {
        let keep = granularity.keeps();
        Coords {
            physical: PhysicalCoords {
                dev: self.physical.dev,
                sm: self.physical.sm.keep(keep.sm),
                wp: self.physical.wp.keep(keep.wp),
                ln: self.physical.ln.keep(keep.ln),
            },
            logical: LogicalCoords {
                kernel_id: self.logical.kernel_id.keep(keep.kernel),
                grid_id: self.logical.grid_id.keep(keep.kernel),
                cluster_idx: self.logical.cluster_idx.keep(keep.block),
                block_idx: self.logical.block_idx.keep(keep.block),
                thread_idx: self.logical.thread_idx.keep(keep.thread),
            },
        }
    }
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.physical, self.logical)
    }
}

/// The level of detail of a query result. Each granularity implies a
/// set of kept fields; see [`Coords::project`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Devices,
    Sms,
    Warps,
    Lanes,
    Kernels,
    Blocks,
    Threads,
}

/// Fields kept by a granularity, beyond the device which is always
/// kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Keep {
    pub(crate) sm: bool,
    pub(crate) wp: bool,
    pub(crate) ln: bool,
    /// Kernel and grid id.
    pub(crate) kernel: bool,
    /// Cluster and block index.
    pub(crate) block: bool,
    pub(crate) thread: bool,
}

impl Granularity {
    pub const ALL: [Granularity; 7] = [
        Granularity::Devices,
        Granularity::Sms,
        Granularity::Warps,
        Granularity::Lanes,
        Granularity::Kernels,
        Granularity::Blocks,
        Granularity::Threads,
    ];

    /// Kernels, blocks and threads are logical granularities: they
    /// never report execution units without a valid warp.
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            Granularity::Kernels | Granularity::Blocks | Granularity::Threads
        )
    }

    pub(crate) fn keeps(self) -> Keep {
        let (sm, wp, ln, kernel, block, thread) = match self {
            Granularity::Devices => (false, false, false, false, false, false),
            Granularity::Sms => (true, false, false, true, false, false),
            Granularity::Warps => (true, true, false, true, true, true),
            Granularity::Lanes => (true, true, true, true, true, true),
            Granularity::Kernels => (false, false, false, true, false, false),
            Granularity::Blocks => (true, false, false, true, true, true),
            Granularity::Threads => (true, true, true, true, true, true),
        };
        Keep {
            sm,
            wp,
            ln,
            kernel,
            block,
            thread,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Devices => "devices",
            Granularity::Sms => "sms",
            Granularity::Warps => "warps",
            Granularity::Lanes => "lanes",
            Granularity::Kernels => "kernels",
            Granularity::Blocks => "blocks",
            Granularity::Threads => "threads",
        };
        f.write_str(name)
    }
}

/// Construct a [`Coords`] filter by naming its concrete fields; every
/// field left out is a wildcard.
///
/// Scalar fields are `dev`, `sm`, `wp`, `ln` (`u32`) and `kernel`,
/// `grid` (`u64`). The 3-D fields `cluster`, `block` and `thread`
/// accept a `(x, y, z)` tuple, a [`Dim3`] or an [`Idx3`].
///
/// ```
/// use warpslice::Field;
/// use warpslice::Idx3;
///
/// let filter = warpslice::coords!(dev = 0, ln = 5, block = (1, 0, 0));
/// assert_eq!(filter.physical.dev, Field::Value(0));
/// assert_eq!(filter.physical.sm, Field::Wildcard);
/// assert_eq!(filter.logical.block_idx, Idx3::new(1, 0, 0));
/// ```
#[macro_export]
macro_rules! coords {
    (@set $c:ident, dev, $v:expr) => { $c.physical.dev = $crate::Field::from($v) };
    (@set $c:ident, sm, $v:expr) => { $c.physical.sm = $crate::Field::from($v) };
    (@set $c:ident, wp, $v:expr) => { $c.physical.wp = $crate::Field::from($v) };
    (@set $c:ident, ln, $v:expr) => { $c.physical.ln = $crate::Field::from($v) };
    (@set $c:ident, kernel, $v:expr) => { $c.logical.kernel_id = $crate::Field::from($v) };
    (@set $c:ident, grid, $v:expr) => { $c.logical.grid_id = $crate::Field::from($v) };
    (@set $c:ident, cluster, $v:expr) => { $c.logical.cluster_idx = $crate::Idx3::from($v) };
    (@set $c:ident, block, $v:expr) => { $c.logical.block_idx = $crate::Idx3::from($v) };
    (@set $c:ident, thread, $v:expr) => { $c.logical.thread_idx = $crate::Idx3::from($v) };

    ( $( $field:ident = $value:expr ),* $(,)? ) => {{
        #[allow(unused_mut)]
        let mut coords = $crate::Coords::wild();
        $( $crate::coords!(@set coords, $field, $value); )*
        coords
    }};
}
