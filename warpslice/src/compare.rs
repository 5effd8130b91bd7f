//! Ordering of query results.
//!
//! A [`CoordCompare`] orders coordinates by one of the two sub-tuples,
//! either sequentially (lexicographic field order) or by distance from
//! an origin coordinate. The sub-tuple not selected for ordering breaks
//! remaining ties, so two coordinates compare equal exactly when they
//! are field-wise equal.

use std::cmp::Ordering;

use itertools::izip;
use serde::Deserialize;
use serde::Serialize;

use crate::coords::Coords;
use crate::coords::Field;
use crate::coords::Idx3;
use crate::coords::LogicalCoords;
use crate::coords::PhysicalCoords;

/// The sub-tuple a comparator orders by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordOrder {
    /// Kernel, grid, cluster, block, thread.
    #[default]
    Logical,
    /// Device, SM, warp, lane.
    Physical,
}

/// Orders coordinates sequentially or by nearest-neighbor distance
/// from an origin. The mode is fixed per instance; only the origin can
/// be reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordCompare {
    order: CoordOrder,
    origin: Option<Coords>,
}

impl CoordCompare {
    pub fn sequential(order: CoordOrder) -> Self {
        Self {
            order,
            origin: None,
        }
    }

    pub fn nearest(order: CoordOrder, origin: Coords) -> Self {
        Self {
            order,
            origin: Some(origin),
        }
    }

    pub fn order(&self) -> CoordOrder {
        self.order
    }

    pub fn origin(&self) -> Option<&Coords> {
        self.origin.as_ref()
    }

    /// Replace the origin. `None` switches to sequential order.
    pub fn reset_origin(&mut self, origin: Option<Coords>) {
        self.origin = origin;
    }

    pub fn compare(&self, a: &Coords, b: &Coords) -> Ordering {
        match self.order {
            CoordOrder::Logical => self
                .compare_logical(&a.logical, &b.logical)
                .then_with(|| a.physical.cmp(&b.physical)),
            CoordOrder::Physical => self
                .compare_physical(&a.physical, &b.physical)
                .then_with(|| a.logical.cmp(&b.logical)),
        }
    }

    fn compare_physical(&self, a: &PhysicalCoords, b: &PhysicalCoords) -> Ordering {
        if let Some(origin) = &self.origin {
            let o = &origin.physical;
            let decided = nearest_field(&o.dev, &a.dev, &b.dev)
                .or_else(|| nearest_field(&o.sm, &a.sm, &b.sm))
                .or_else(|| nearest_field(&o.wp, &a.wp, &b.wp))
                .or_else(|| nearest_field(&o.ln, &a.ln, &b.ln));
            if let Some(ordering) = decided {
                return ordering;
            }
        }
        a.cmp(b)
    }

    // The cluster index is not a distance axis; it only participates
    // in the sequential fallback.
    fn compare_logical(&self, a: &LogicalCoords, b: &LogicalCoords) -> Ordering {
        if let Some(origin) = &self.origin {
            let o = &origin.logical;
            let decided = nearest_field(&o.kernel_id, &a.kernel_id, &b.kernel_id)
                .or_else(|| nearest_field(&o.grid_id, &a.grid_id, &b.grid_id))
                .or_else(|| nearest_idx3(&o.block_idx, &a.block_idx, &b.block_idx))
                .or_else(|| nearest_idx3(&o.thread_idx, &a.thread_idx, &b.thread_idx));
            if let Some(ordering) = decided {
                return ordering;
            }
        }
        a.cmp(b)
    }
}

impl Default for CoordCompare {
    fn default() -> Self {
        Self::sequential(CoordOrder::default())
    }
}

const IGNORE_KEY: u64 = u64::MAX - 2;
const WILDCARD_KEY: u64 = u64::MAX - 1;
const INVALID_KEY: u64 = u64::MAX;

fn key<T: Copy + Into<u64>>(field: &Field<T>) -> u64 {
    match field {
        Field::Value(value) => (*value).into(),
        Field::Wildcard => WILDCARD_KEY,
        Field::Invalid => INVALID_KEY,
    }
}

fn keys(idx: &Idx3) -> [u64; 3] {
    match idx {
        Idx3::At(x, y, z) => [key(x), key(y), key(z)],
        Idx3::Ignore => [IGNORE_KEY; 3],
    }
}

fn decided(ordering: Ordering) -> Option<Ordering> {
    ordering.is_ne().then_some(ordering)
}

fn nearest_field<T: Copy + Into<u64>>(
    origin: &Field<T>,
    a: &Field<T>,
    b: &Field<T>,
) -> Option<Ordering> {
    if origin.is_wildcard() {
        return None;
    }
    let o = key(origin);
    decided(key(a).abs_diff(o).cmp(&key(b).abs_diff(o)))
}

/// Compares per-component distances in x, y, z order. An origin with
/// any wildcard component gives no decision.
fn nearest_idx3(origin: &Idx3, a: &Idx3, b: &Idx3) -> Option<Ordering> {
    if origin.has_wildcard() {
        return None;
    }
    izip!(keys(origin), keys(a), keys(b))
        .map(|(o, a, b)| a.abs_diff(o).cmp(&b.abs_diff(o)))
        .find(|ordering| ordering.is_ne())
}
