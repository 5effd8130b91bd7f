//! The coordinate enumeration engine.
//!
//! A [`Query`] walks the device hierarchy of a [`DeviceState`]
//! (device, SM, warp, lane), keeps the execution units that satisfy
//! its filter and [`Select`] criteria, projects each of them to the
//! query's [`Granularity`] and returns the result as an ordered,
//! deduplicated [`CoordSet`].
//!
//! ```
//! use warpslice::Granularity;
//! use warpslice::Query;
//! use warpslice::Select;
//! use warpslice::sim::Snapshot;
//!
//! let state = Snapshot::new(1, 2, 4, 32);
//! let lanes = Query::new(Granularity::Lanes)
//!     .filter(warpslice::coords!(dev = 0, sm = 1))
//!     .eval(&state)
//!     .unwrap();
//! // Without `VALID`, physical granularities report every slot.
//! assert_eq!(lanes.len(), 4 * 32);
//!
//! let valid = Query::new(Granularity::Lanes)
//!     .select(Select::VALID)
//!     .eval(&state)
//!     .unwrap();
//! assert!(valid.is_empty());
//! ```

#[cfg(test)]
mod properties;

use std::collections::HashSet;

use bitflags::bitflags;

use crate::compare::CoordCompare;
use crate::compare::CoordOrder;
use crate::coords::Coords;
use crate::coords::Field;
use crate::coords::Granularity;
use crate::coords::Idx3;
use crate::coords::LogicalCoords;
use crate::coords::PhysicalCoords;
use crate::state::DeviceState;
use crate::state::StateError;

bitflags! {
    /// Criteria an execution unit must meet to be reported. The empty
    /// set reports every unit that matches the filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Select: u32 {
        /// Only valid SMs, warps and lanes.
        const VALID = 1 << 0;
        /// Only active lanes stopped at an inserted breakpoint.
        const BREAKPOINT = 1 << 1;
        /// Only active lanes with an exception, on SMs reporting one.
        const EXCEPTION = 1 << 2;
        /// Only SMs reporting an exception.
        const SM_EXCEPTION = 1 << 3;
        /// Stop at the first reported unit.
        const SINGLE = 1 << 4;
        /// Only active lanes of warps stopped at a trap.
        const TRAP = 1 << 5;
        /// Skip warps and lanes whose timestamp is older than the
        /// logical clock.
        const CURRENT_CLOCK = 1 << 6;
        /// Only active lanes.
        const ACTIVE = 1 << 7;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(
        "nearest-neighbor {order:?} order needs fully defined coordinates, \
         but {granularity} coordinates are partially wildcard"
    )]
    PartialOrigin {
        order: CoordOrder,
        granularity: Granularity,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// A description of the execution units to enumerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    filter: Coords,
    granularity: Granularity,
    select: Select,
    order: CoordOrder,
    origin: Option<Coords>,
}

impl Query {
    /// A query for every unit at `granularity`, in sequential logical
    /// order.
    pub fn new(granularity: Granularity) -> Self {
        Self {
            filter: Coords::wild(),
            granularity,
            select: Select::empty(),
            order: CoordOrder::default(),
            origin: None,
        }
    }

    pub fn filter(mut self, filter: Coords) -> Self {
        self.filter = filter;
        self
    }

    pub fn select(mut self, select: Select) -> Self {
        self.select = select;
        self
    }

    pub fn order(mut self, order: CoordOrder) -> Self {
        self.order = order;
        self
    }

    /// Order results by distance from `origin` instead of sequentially.
    pub fn origin(mut self, origin: Coords) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Check that the query can be evaluated. Nearest-neighbor ordering
    /// needs results whose ordered sub-tuple is fully defined, which
    /// only lane and thread granularities produce.
    pub fn validate(&self) -> Result<&Self, QueryError> {
        if self.origin.is_some() && self.granularity.one_per_warp() {
            return Err(QueryError::PartialOrigin {
                order: self.order,
                granularity: self.granularity,
            });
        }
        Ok(self)
    }

    /// Enumerate the matching units of `state`.
    pub fn eval<S: DeviceState + ?Sized>(&self, state: &S) -> Result<CoordSet, QueryError> {
        let mut coords = self.validate()?.walk(state)?;

        let comparator = match self.origin {
            Some(origin) => CoordCompare::nearest(self.order, origin),
            None => CoordCompare::sequential(self.order),
        };
        coords.sort_by(|a, b| comparator.compare(a, b));
        coords.dedup();

        tracing::debug!(
            granularity = %self.granularity,
            select = ?self.select,
            filter = %self.filter,
            found = coords.len(),
            "coord set query"
        );
        Ok(CoordSet { coords, comparator })
    }

    fn walk<S: DeviceState + ?Sized>(&self, state: &S) -> Result<Vec<Coords>, QueryError> {
        let filter = &self.filter;
        let select = self.select;
        let granularity = self.granularity;
        let clock = state.clock();
        let stale = |timestamp: Option<u64>| timestamp.is_some_and(|t| t < clock);

        let mut seen = Seen::new(granularity);
        let mut found = Vec::new();

        'devices: for dev in 0..state.num_devices() {
            if !filter.physical.dev.matches(&Field::Value(dev)) {
                continue;
            }
            for sm in 0..state.num_sms(dev) {
                if !filter.physical.sm.matches(&Field::Value(sm)) {
                    continue;
                }
                if select.intersects(Select::EXCEPTION | Select::SM_EXCEPTION)
                    && !state.sm_has_exception(dev, sm)
                {
                    continue;
                }
                let sm_valid = state.sm_valid(dev, sm);
                if select.contains(Select::VALID) && !sm_valid {
                    continue;
                }
                let found_before_sm = found.len();

                for wp in 0..state.num_warps(dev) {
                    if !filter.physical.wp.matches(&Field::Value(wp)) {
                        continue;
                    }
                    let warp_valid = sm_valid && state.warp_valid(dev, sm, wp);
                    if !warp_valid && (select.contains(Select::VALID) || granularity.is_logical()) {
                        continue;
                    }
                    if select.contains(Select::CURRENT_CLOCK)
                        && stale(state.warp_timestamp(dev, sm, wp))
                    {
                        continue;
                    }
                    if select.contains(Select::TRAP) && !state.warp_broken(dev, sm, wp) {
                        continue;
                    }

                    let logical = if warp_valid {
                        warp_identity(state, dev, sm, wp)?
                    } else {
                        LogicalCoords {
                            kernel_id: Field::Invalid,
                            grid_id: Field::Invalid,
                            cluster_idx: Idx3::INVALID,
                            block_idx: Idx3::INVALID,
                            thread_idx: Idx3::INVALID,
                        }
                    };
                    let f = &filter.logical;
                    if !(f.kernel_id.matches(&logical.kernel_id)
                        && f.grid_id.matches(&logical.grid_id)
                        && f.cluster_idx.matches(&logical.cluster_idx)
                        && f.block_idx.matches(&logical.block_idx))
                    {
                        continue;
                    }
                    if seen.contains(&logical) {
                        continue;
                    }
                    let found_before_warp = found.len();

                    for ln in 0..state.num_lanes(dev) {
                        if !filter.physical.ln.matches(&Field::Value(ln)) {
                            continue;
                        }
                        let lane_valid = warp_valid && state.lane_valid(dev, sm, wp, ln);
                        if select.contains(Select::VALID) && !lane_valid {
                            continue;
                        }
                        let lane_active = lane_valid && state.lane_active(dev, sm, wp, ln);
                        if select.contains(Select::ACTIVE) && !lane_active {
                            continue;
                        }
                        if select.contains(Select::CURRENT_CLOCK)
                            && stale(state.lane_timestamp(dev, sm, wp, ln))
                        {
                            continue;
                        }
                        if select.contains(Select::BREAKPOINT)
                            && !(lane_active
                                && state.breakpoint_at(dev, state.lane_pc(dev, sm, wp, ln)))
                        {
                            continue;
                        }
                        if select.contains(Select::EXCEPTION)
                            && !(lane_active && state.lane_exception(dev, sm, wp, ln).is_some())
                        {
                            continue;
                        }
                        if select.contains(Select::TRAP) && !lane_active {
                            continue;
                        }

                        let thread_idx = if lane_valid {
                            Idx3::from(state.lane_thread_idx(dev, sm, wp, ln))
                        } else {
                            Idx3::INVALID
                        };
                        if !f.thread_idx.matches(&thread_idx) {
                            continue;
                        }

                        let coords = Coords {
                            physical: PhysicalCoords::new(dev, sm, wp, ln),
                            logical: LogicalCoords {
                                thread_idx,
                                ..logical
                            },
                        };
                        seen.insert(&logical);
                        found.push(coords.project(granularity));

                        if select.contains(Select::SINGLE) {
                            break 'devices;
                        }
                        if granularity.one_per_warp() {
                            break;
                        }
                    }

                    if granularity.one_per_sm() && found.len() > found_before_warp {
                        break;
                    }
                }

                if granularity.one_per_device() && found.len() > found_before_sm {
                    break;
                }
            }
        }

        Ok(found)
    }
}

/// The logical identity of a valid warp. The thread index is left
/// wildcard; it is resolved per lane.
///
/// # Panics
///
/// Panics if the warp's kernel is not in the kernel table.
fn warp_identity<S: DeviceState + ?Sized>(
    state: &S,
    dev: u32,
    sm: u32,
    wp: u32,
) -> Result<LogicalCoords, QueryError> {
    let kernel = state
        .warp_kernel(dev, sm, wp)
        .and_then(|kernel_id| state.kernels().get(kernel_id))
        .unwrap_or_else(|| panic!("valid warp dev{dev}.sm{sm}.wp{wp} runs an unknown kernel"));
    let cluster_idx = if kernel.cluster_dim(state)?.has_volume() {
        Idx3::from(state.warp_cluster_idx(dev, sm, wp))
    } else {
        Idx3::Ignore
    };
    Ok(LogicalCoords {
        kernel_id: Field::Value(kernel.id()),
        grid_id: Field::Value(state.warp_grid_id(dev, sm, wp)),
        cluster_idx,
        block_idx: Idx3::from(state.warp_block_idx(dev, sm, wp)),
        thread_idx: Idx3::WILDCARD,
    })
}

impl Granularity {
    /// At most one result per warp: the lane loop stops after the
    /// first hit.
    fn one_per_warp(self) -> bool {
        !matches!(self, Granularity::Lanes | Granularity::Threads)
    }

    fn one_per_sm(self) -> bool {
        matches!(self, Granularity::Devices | Granularity::Sms)
    }

    fn one_per_device(self) -> bool {
        self == Granularity::Devices
    }
}

/// Logical keys already reported, for the granularities that collapse
/// many warps into one result.
enum Seen {
    Nothing,
    Kernels(HashSet<Field<u64>>),
    Blocks(HashSet<(Field<u64>, Idx3)>),
}

impl Seen {
    fn new(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Kernels => Seen::Kernels(HashSet::new()),
            Granularity::Blocks => Seen::Blocks(HashSet::new()),
            _ => Seen::Nothing,
        }
    }

    fn contains(&self, logical: &LogicalCoords) -> bool {
        match self {
            Seen::Nothing => false,
            Seen::Kernels(kernels) => kernels.contains(&logical.kernel_id),
            Seen::Blocks(blocks) => blocks.contains(&(logical.kernel_id, logical.block_idx)),
        }
    }

    fn insert(&mut self, logical: &LogicalCoords) {
        match self {
            Seen::Nothing => {}
            Seen::Kernels(kernels) => {
                kernels.insert(logical.kernel_id);
            }
            Seen::Blocks(blocks) => {
                blocks.insert((logical.kernel_id, logical.block_idx));
            }
        }
    }
}

/// The result of a [`Query`]: deduplicated coordinates in comparator
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordSet {
    coords: Vec<Coords>,
    comparator: CoordCompare,
}

impl CoordSet {
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Coords> {
        self.coords.iter()
    }

    /// The first coordinate in comparator order.
    pub fn first(&self) -> Option<&Coords> {
        self.coords.first()
    }

    pub fn contains(&self, coords: &Coords) -> bool {
        self.coords
            .binary_search_by(|probe| self.comparator.compare(probe, coords))
            .is_ok()
    }

    pub fn comparator(&self) -> &CoordCompare {
        &self.comparator
    }

    pub fn into_vec(self) -> Vec<Coords> {
        self.coords
    }
}

impl IntoIterator for CoordSet {
    type Item = Coords;
    type IntoIter = std::vec::IntoIter<Coords>;

    fn into_iter(self) -> Self::IntoIter {
        self.coords.into_iter()
    }
}

impl<'a> IntoIterator for &'a CoordSet {
    type Item = &'a Coords;
    type IntoIter = std::slice::Iter<'a, Coords>;

    fn into_iter(self) -> Self::IntoIter {
        self.coords.iter()
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::coords;
    use crate::coords::Dim3;
    use crate::kernel::GridId;
    use crate::kernel::KernelId;
    use crate::kernel::KernelLaunch;
    use crate::kernel::KernelOrigin;
    use crate::kernel::KernelType;
    use crate::sim::Snapshot;
    use crate::state::Exception;

    fn launch(kernel_id: KernelId, grid_id: GridId, cluster_dim: Dim3) -> KernelLaunch {
        KernelLaunch {
            kernel_id,
            dev: 0,
            grid_id,
            module_id: 1,
            entry: 0x1000 * kernel_id,
            grid_dim: Dim3::new(4, 1, 1),
            block_dim: Dim3::new(64, 1, 1),
            cluster_dim,
            kernel_type: KernelType::Application,
            origin: KernelOrigin::Cpu,
            parent_grid_id: None,
        }
    }

    /// 1 device, 2 SMs x 4 warps x 4 lanes. Kernel 1 runs blocks 0 and
    /// 1 on SM 0 (two warps each); kernel 2 (clustered) runs block 0
    /// on SM 1, warp 2. Everything else is idle.
    fn state() -> Snapshot {
        let mut state = Snapshot::new(1, 2, 4, 4);
        state.launch(launch(1, 10, Dim3::new(0, 0, 0)));
        state.launch(launch(2, 20, Dim3::new(2, 1, 1)));
        state.populate_warp(0, 0, 0, 1, Dim3::new(0, 0, 0), 0, 4);
        state.populate_warp(0, 0, 1, 1, Dim3::new(0, 0, 0), 4, 4);
        state.populate_warp(0, 0, 2, 1, Dim3::new(1, 0, 0), 0, 4);
        state.populate_warp(0, 0, 3, 1, Dim3::new(1, 0, 0), 4, 2);
        state.populate_warp(0, 1, 2, 2, Dim3::new(0, 0, 0), 0, 4);
        state
    }

    fn eval(state: &Snapshot, query: Query) -> Vec<Coords> {
        query.eval(state).unwrap().into_vec()
    }

    #[test]
    fn test_physical_granularities_report_invalid_units() {
        let state = state();
        let sms = eval(&state, Query::new(Granularity::Sms).order(CoordOrder::Physical));
        let mut idle_sm = coords!(dev = 0, sm = 1);
        idle_sm.logical.kernel_id = Field::Invalid;
        idle_sm.logical.grid_id = Field::Invalid;
        assert_eq!(
            sms,
            vec![coords!(dev = 0, sm = 0, kernel = 1, grid = 10), idle_sm]
        );

        let devices = eval(&state, Query::new(Granularity::Devices));
        assert_eq!(devices, vec![coords!(dev = 0)]);

        let lanes = eval(&state, Query::new(Granularity::Lanes));
        assert_eq!(lanes.len(), 2 * 4 * 4);
        let idle = lanes
            .iter()
            .filter(|c| c.logical.kernel_id == Field::Invalid)
            .count();
        assert_eq!(idle, 3 * 4);
    }

    #[test]
    fn test_valid_lanes() {
        let state = state();
        let lanes = eval(
            &state,
            Query::new(Granularity::Lanes)
                .select(Select::VALID)
                .order(CoordOrder::Physical),
        );
        assert_eq!(lanes.len(), 5 * 4);
        assert_eq!(
            lanes[0],
            coords!(
                dev = 0,
                sm = 0,
                wp = 0,
                ln = 0,
                kernel = 1,
                grid = 10,
                cluster = Idx3::Ignore,
                block = (0, 0, 0),
                thread = (0, 0, 0),
            )
        );
        assert_eq!(
            lanes[5].logical.thread_idx,
            Idx3::new(5, 0, 0),
            "second warp of block 0 covers threads 4.."
        );
        let last = lanes.last().unwrap();
        assert_eq!(last.physical, PhysicalCoords::new(0, 1, 2, 3));
        assert_eq!(last.logical.cluster_idx, Idx3::new(0, 0, 0));
    }

    #[test]
    fn test_active_lanes() {
        let state = state();
        let lanes = eval(
            &state,
            Query::new(Granularity::Lanes)
                .filter(coords!(wp = 3))
                .select(Select::VALID | Select::ACTIVE),
        );
        assert_eq!(lanes.len(), 2);
    }

    #[test]
    fn test_warps() {
        let state = state();
        let warps = eval(
            &state,
            Query::new(Granularity::Warps)
                .select(Select::VALID)
                .order(CoordOrder::Physical),
        );
        assert_eq!(warps.len(), 5);
        assert_eq!(
            warps[4],
            coords!(
                dev = 0,
                sm = 1,
                wp = 2,
                kernel = 2,
                grid = 20,
                cluster = (0, 0, 0),
                block = (0, 0, 0),
                thread = (0, 0, 0),
            )
        );
    }

    #[test]
    fn test_coarse_granularities_keep_owner() {
        let state = state();
        let sms = eval(
            &state,
            Query::new(Granularity::Sms)
                .select(Select::VALID)
                .order(CoordOrder::Physical),
        );
        assert_eq!(
            sms,
            vec![
                coords!(dev = 0, sm = 0, kernel = 1, grid = 10),
                coords!(dev = 0, sm = 1, kernel = 2, grid = 20),
            ]
        );

        let warps = eval(&state, Query::new(Granularity::Warps).select(Select::VALID));
        assert!(warps.iter().all(|c| c.logical.thread_idx.dim3().is_some()));
        assert_eq!(
            warps[1].to_string(),
            "dev0.sm0.wp1.ln* kernel1.grid10.cluster-.block(0,0,0).thread(4,0,0)"
        );

        let blocks = eval(
            &state,
            Query::new(Granularity::Blocks)
                .filter(coords!(kernel = 2))
                .select(Select::VALID),
        );
        assert_eq!(
            blocks[0].to_string(),
            "dev0.sm1.wp*.ln* kernel2.grid20.cluster(0,0,0).block(0,0,0).thread(0,0,0)"
        );
    }

    #[test]
    fn test_kernels_are_deduplicated() {
        let state = state();
        let kernels = eval(&state, Query::new(Granularity::Kernels));
        assert_eq!(
            kernels,
            vec![
                coords!(dev = 0, kernel = 1, grid = 10),
                coords!(dev = 0, kernel = 2, grid = 20),
            ]
        );
    }

    #[test]
    fn test_blocks_are_deduplicated() {
        let state = state();
        let blocks = eval(&state, Query::new(Granularity::Blocks).select(Select::VALID));
        let keys: Vec<_> = blocks
            .iter()
            .map(|c| (c.logical.kernel_id, c.logical.block_idx))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Field::Value(1), Idx3::new(0, 0, 0)),
                (Field::Value(1), Idx3::new(1, 0, 0)),
                (Field::Value(2), Idx3::new(0, 0, 0)),
            ]
        );
        assert_eq!(blocks[0].physical.sm, Field::Value(0));
        assert_eq!(blocks[0].physical.wp, Field::Wildcard);
        // Each block reports its first thread.
        assert_eq!(blocks[1].logical.thread_idx, Idx3::new(0, 0, 0));
    }

    #[test]
    fn test_kernel_seen_only_when_emitted() {
        let mut state = state();
        // Lane filters that no lane of the first warp passes must not
        // hide the kernel's later warps.
        state.lane_mut(0, 0, 3, 1).exception = Some(Exception::IllegalAddress);
        state.sm_mut(0, 0).exception = true;
        let kernels = eval(
            &state,
            Query::new(Granularity::Kernels).select(Select::EXCEPTION),
        );
        assert_eq!(kernels, vec![coords!(dev = 0, kernel = 1, grid = 10)]);
    }

    #[test]
    fn test_logical_filters() {
        let state = state();
        let threads = eval(
            &state,
            Query::new(Granularity::Threads)
                .filter(coords!(kernel = 1, block = (1, 0, 0), thread = (5, 0, 0))),
        );
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].physical, PhysicalCoords::new(0, 0, 3, 1));

        let clustered = eval(
            &state,
            Query::new(Granularity::Warps).filter(coords!(cluster = (0, 0, 0))),
        );
        assert_eq!(clustered.len(), 1);
        assert_eq!(clustered[0].logical.kernel_id, Field::Value(2));

        let unclustered = eval(
            &state,
            Query::new(Granularity::Warps).filter(Coords {
                logical: LogicalCoords {
                    cluster_idx: Idx3::Ignore,
                    ..LogicalCoords::wild()
                },
                ..Coords::wild()
            }),
        );
        assert_eq!(unclustered.len(), 4);
    }

    #[test]
    fn test_invalid_marker_is_filterable() {
        let state = state();
        let idle = eval(
            &state,
            Query::new(Granularity::Warps).filter(Coords {
                logical: LogicalCoords {
                    kernel_id: Field::Invalid,
                    ..LogicalCoords::wild()
                },
                ..Coords::wild()
            }),
        );
        assert_eq!(idle.len(), 3);
        assert!(idle.iter().all(|c| c.logical.block_idx == Idx3::INVALID));
    }

    #[test]
    fn test_single() {
        let state = state();
        let first = eval(
            &state,
            Query::new(Granularity::Threads).select(Select::VALID | Select::SINGLE),
        );
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].physical, PhysicalCoords::new(0, 0, 0, 0));
    }

    #[test]
    fn test_breakpoint() {
        let mut state = state();
        state.insert_breakpoint(0, 0x2000);
        let hits = eval(
            &state,
            Query::new(Granularity::Lanes).select(Select::VALID | Select::BREAKPOINT),
        );
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|c| c.logical.kernel_id == Field::Value(2)));

        // Inactive lanes are not at the breakpoint.
        state.lane_mut(0, 1, 2, 0).active = false;
        let hits = eval(&state, Query::new(Granularity::Lanes).select(Select::BREAKPOINT));
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_exception_requires_sm_exception() {
        let mut state = state();
        state.lane_mut(0, 1, 2, 3).exception = Some(Exception::WarpAssert);
        let query = Query::new(Granularity::Lanes).select(Select::EXCEPTION);
        assert!(query.eval(&state).unwrap().is_empty());

        state.sm_mut(0, 1).exception = true;
        let hits = eval(&state, query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].physical, PhysicalCoords::new(0, 1, 2, 3));

        let sms = eval(&state, Query::new(Granularity::Sms).select(Select::SM_EXCEPTION));
        assert_eq!(sms.len(), 1);
        assert_eq!(sms[0].physical, coords!(dev = 0, sm = 1).physical);
    }

    #[test]
    fn test_trap_and_clock() {
        let mut state = state();
        state.set_clock(5);
        state.warp_mut(0, 0, 1).broken = true;
        state.warp_mut(0, 0, 2).broken = true;
        state.warp_mut(0, 0, 2).timestamp = Some(5);
        state.warp_mut(0, 0, 2).lanes[0].timestamp = Some(5);

        let trapped = eval(
            &state,
            Query::new(Granularity::Warps)
                .select(Select::VALID | Select::TRAP)
                .order(CoordOrder::Physical),
        );
        assert_eq!(trapped.len(), 2);

        // Every warp but one was populated before the clock advanced.
        let current = eval(
            &state,
            Query::new(Granularity::Lanes)
                .select(Select::VALID | Select::TRAP | Select::CURRENT_CLOCK),
        );
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].physical, PhysicalCoords::new(0, 0, 2, 0));

        // Unknown timestamps are never stale.
        state.warp_mut(0, 0, 1).timestamp = None;
        state.warp_mut(0, 0, 1).lanes[2].timestamp = None;
        let current = eval(
            &state,
            Query::new(Granularity::Lanes)
                .select(Select::TRAP | Select::CURRENT_CLOCK)
                .order(CoordOrder::Physical),
        );
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].physical, PhysicalCoords::new(0, 0, 1, 2));
    }

    #[test]
    fn test_nearest_order() {
        let state = state();
        let origin = coords!(dev = 0, sm = 0, wp = 2, ln = 2);
        let lanes = eval(
            &state,
            Query::new(Granularity::Lanes)
                .select(Select::VALID)
                .order(CoordOrder::Physical)
                .origin(origin),
        );
        assert_eq!(lanes[0].physical, PhysicalCoords::new(0, 0, 2, 2));
        assert_eq!(lanes[1].physical, PhysicalCoords::new(0, 0, 2, 1));
        assert_eq!(lanes[2].physical, PhysicalCoords::new(0, 0, 2, 3));
        // On SM 1 only the lane axis differs; lane 0 is farthest.
        assert_eq!(lanes.last().unwrap().physical, PhysicalCoords::new(0, 1, 2, 0));
    }

    #[test]
    fn test_origin_requires_fine_granularity() {
        let state = state();
        let err = Query::new(Granularity::Warps)
            .origin(coords!(dev = 0))
            .eval(&state)
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::PartialOrigin {
                granularity: Granularity::Warps,
                ..
            }
        ));
    }

    #[test]
    fn test_state_errors_propagate() {
        let mut state = state();
        state.invalidate();
        state.forget_grid(0, 20);
        let err = Query::new(Granularity::Warps).eval(&state).unwrap_err();
        assert!(matches!(
            err,
            QueryError::State(StateError::GridNotFound { dev: 0, grid_id: 20 })
        ));
    }

    #[test]
    #[should_panic(expected = "unknown kernel")]
    fn test_valid_warp_without_kernel() {
        let mut state = state();
        state.warp_mut(0, 1, 0).valid = true;
        state.warp_mut(0, 1, 0).grid_id = 99;
        let _ = Query::new(Granularity::Warps).eval(&state);
    }

    #[test]
    fn test_contains() {
        let state = state();
        let set = Query::new(Granularity::Kernels).eval(&state).unwrap();
        assert!(set.contains(&coords!(dev = 0, kernel = 2, grid = 20)));
        assert!(!set.contains(&coords!(dev = 0, kernel = 3, grid = 30)));
        assert_eq!(set.first(), set.iter().next());
        assert_eq!((&set).into_iter().count(), 2);
    }

    #[traced_test]
    #[test]
    fn test_query_is_logged() {
        let state = state();
        Query::new(Granularity::Kernels).eval(&state).unwrap();
        assert!(logs_contain("coord set query"));
        assert!(logs_contain("granularity=kernels"));
        assert!(logs_contain("found=2"));
    }
}
