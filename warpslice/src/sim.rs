//! An in-memory [`DeviceState`].
//!
//! A [`Snapshot`] models a set of identical devices together with the
//! kernels launched on them. It is used to replay recorded state and
//! to drive the engine in tests. All units start out invalid; kernels
//! are registered with [`Snapshot::launch`] and warps are put to work
//! with [`Snapshot::populate_warp`]. Individual units can then be
//! adjusted through [`Snapshot::sm_mut`], [`Snapshot::warp_mut`] and
//! [`Snapshot::lane_mut`].

use std::cell::Cell;
use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::coords::Dim3;
use crate::kernel::GridId;
use crate::kernel::GridStatus;
use crate::kernel::Kernel;
use crate::kernel::KernelId;
use crate::kernel::KernelLaunch;
use crate::kernel::KernelTable;
use crate::rangemap::RangeMap;
use crate::state::DeviceState;
use crate::state::Exception;
use crate::state::GridInfo;
use crate::state::StateError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneSnapshot {
    pub valid: bool,
    pub active: bool,
    pub exception: Option<Exception>,
    pub timestamp: Option<u64>,
    pub pc: u64,
    pub thread_idx: Dim3,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarpSnapshot {
    pub valid: bool,
    pub broken: bool,
    pub timestamp: Option<u64>,
    pub grid_id: GridId,
    pub block_idx: Dim3,
    pub cluster_idx: Dim3,
    pub lanes: Vec<LaneSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmSnapshot {
    pub valid: bool,
    pub exception: bool,
    pub warps: Vec<WarpSnapshot>,
}

#[derive(Debug, Clone, Default)]
struct DeviceSnapshot {
    sms: Vec<SmSnapshot>,
    num_warps: u32,
    num_lanes: u32,
    breakpoints: BTreeSet<u64>,
}

#[derive(Debug, Clone, Copy)]
struct GridRecord {
    info: GridInfo,
    status: GridStatus,
}

/// A point-in-time model of device state.
#[derive(Debug, Default)]
pub struct Snapshot {
    devices: Vec<DeviceSnapshot>,
    clock: u64,
    kernels: KernelTable,
    functions: RangeMap<String>,
    grids: HashMap<(u32, GridId), GridRecord>,
    grid_queries: Cell<usize>,
}

impl Snapshot {
    /// A snapshot of `num_devices` devices with `num_sms` SMs of
    /// `num_warps` warps of `num_lanes` lanes each, all invalid.
    pub fn new(num_devices: u32, num_sms: u32, num_warps: u32, num_lanes: u32) -> Self {
        let warp = WarpSnapshot {
            lanes: vec![LaneSnapshot::default(); num_lanes as usize],
            ..WarpSnapshot::default()
        };
        let sm = SmSnapshot {
            warps: vec![warp; num_warps as usize],
            ..SmSnapshot::default()
        };
        let device = DeviceSnapshot {
            sms: vec![sm; num_sms as usize],
            num_warps,
            num_lanes,
            breakpoints: BTreeSet::new(),
        };
        Self {
            devices: vec![device; num_devices as usize],
            ..Self::default()
        }
    }

    /// Register the function symbol covering `[start, start + size)`.
    /// Kernels whose entry point falls in the range take its name.
    pub fn add_function(&mut self, start: u64, size: u64, name: impl Into<String>) {
        self.functions.insert(start, size, name.into());
    }

    /// Register a launched kernel. Its grid starts out active.
    pub fn launch(&mut self, launch: KernelLaunch) -> KernelId {
        let name = self.functions.get(launch.entry).cloned();
        self.grids.insert(
            (launch.dev, launch.grid_id),
            GridRecord {
                info: GridInfo {
                    cluster_dim: launch.cluster_dim,
                },
                status: GridStatus::Active,
            },
        );
        let kernel_id = launch.kernel_id;
        self.kernels.insert(Kernel::new(launch, name));
        kernel_id
    }

    /// Remove an exited kernel. Its grid is terminated and the warps
    /// that were running it are retired.
    pub fn exit_kernel(&mut self, kernel_id: KernelId) -> Option<Kernel> {
        let kernel = self.kernels.remove(kernel_id)?;
        let (dev, grid_id) = (kernel.dev(), kernel.grid_id());
        self.set_grid_status(dev, grid_id, GridStatus::Terminated);
        for sm in &mut self.devices[dev as usize].sms {
            for warp in sm.warps.iter_mut().filter(|w| w.valid && w.grid_id == grid_id) {
                warp.valid = false;
                for lane in &mut warp.lanes {
                    lane.valid = false;
                    lane.active = false;
                }
            }
        }
        Some(kernel)
    }

    pub fn set_grid_status(&mut self, dev: u32, grid_id: GridId, status: GridStatus) {
        if let Some(grid) = self.grids.get_mut(&(dev, grid_id)) {
            grid.status = status;
        }
    }

    /// Drop the grid record, so that lookups of the grid fail.
    pub fn forget_grid(&mut self, dev: u32, grid_id: GridId) {
        self.grids.remove(&(dev, grid_id));
    }

    pub fn set_clock(&mut self, clock: u64) {
        self.clock = clock;
    }

    pub fn insert_breakpoint(&mut self, dev: u32, pc: u64) {
        self.devices[dev as usize].breakpoints.insert(pc);
    }

    pub fn remove_breakpoint(&mut self, dev: u32, pc: u64) {
        self.devices[dev as usize].breakpoints.remove(&pc);
    }

    /// Signal that the state changed under the kernels' caches.
    pub fn invalidate(&self) {
        self.kernels.invalidate_all();
    }

    /// The number of grid lookups served so far.
    pub fn grid_queries(&self) -> usize {
        self.grid_queries.get()
    }

    pub fn sm_mut(&mut self, dev: u32, sm: u32) -> &mut SmSnapshot {
        &mut self.devices[dev as usize].sms[sm as usize]
    }

    pub fn warp_mut(&mut self, dev: u32, sm: u32, wp: u32) -> &mut WarpSnapshot {
        &mut self.sm_mut(dev, sm).warps[wp as usize]
    }

    pub fn lane_mut(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> &mut LaneSnapshot {
        &mut self.warp_mut(dev, sm, wp).lanes[ln as usize]
    }

    /// Make warp `wp` run `block_idx` of `kernel_id`, with its lanes
    /// covering the threads `first_thread..` of the block in linear
    /// order. Every lane is valid; the first `active_lanes` are active
    /// and the rest inactive. The warp's SM becomes valid.
    ///
    /// # Panics
    ///
    /// Panics if the kernel is not registered.
    pub fn populate_warp(
        &mut self,
        dev: u32,
        sm: u32,
        wp: u32,
        kernel_id: KernelId,
        block_idx: Dim3,
        first_thread: u32,
        active_lanes: u32,
    ) {
        let kernel = self
            .kernels
            .get(kernel_id)
            .unwrap_or_else(|| panic!("populate_warp: unknown kernel {kernel_id}"));
        let (grid_id, entry, block_dim) = (kernel.grid_id(), kernel.entry(), kernel.block_dim());
        let cluster_dim = self
            .grids
            .get(&(dev, grid_id))
            .map_or(Dim3::default(), |grid| grid.info.cluster_dim);
        let cluster_idx = if cluster_dim.has_volume() {
            Dim3::new(
                block_idx.x / cluster_dim.x,
                block_idx.y / cluster_dim.y,
                block_idx.z / cluster_dim.z,
            )
        } else {
            Dim3::default()
        };
        let clock = self.clock;

        let sm = self.sm_mut(dev, sm);
        sm.valid = true;
        let warp = &mut sm.warps[wp as usize];
        warp.valid = true;
        warp.broken = false;
        warp.timestamp = Some(clock);
        warp.grid_id = grid_id;
        warp.block_idx = block_idx;
        warp.cluster_idx = cluster_idx;
        for (ln, lane) in (0u32..).zip(warp.lanes.iter_mut()) {
            let active = ln < active_lanes;
            *lane = LaneSnapshot {
                valid: true,
                active,
                exception: None,
                timestamp: Some(clock),
                pc: entry,
                thread_idx: thread_idx(block_dim, first_thread + ln),
            };
        }
    }
}

/// The 3-D index of the `linear`-th thread of a block.
fn thread_idx(block_dim: Dim3, linear: u32) -> Dim3 {
    let x = block_dim.x.max(1);
    let y = block_dim.y.max(1);
    Dim3::new(linear % x, (linear / x) % y, linear / (x * y))
}

impl DeviceState for Snapshot {
    fn num_devices(&self) -> u32 {
        self.devices.len() as u32
    }

    fn num_sms(&self, dev: u32) -> u32 {
        self.devices[dev as usize].sms.len() as u32
    }

    fn num_warps(&self, dev: u32) -> u32 {
        self.devices[dev as usize].num_warps
    }

    fn num_lanes(&self, dev: u32) -> u32 {
        self.devices[dev as usize].num_lanes
    }

    fn sm_valid(&self, dev: u32, sm: u32) -> bool {
        self.sm(dev, sm).valid
    }

    fn sm_has_exception(&self, dev: u32, sm: u32) -> bool {
        self.sm(dev, sm).exception
    }

    fn warp_valid(&self, dev: u32, sm: u32, wp: u32) -> bool {
        self.warp(dev, sm, wp).valid
    }

    fn warp_broken(&self, dev: u32, sm: u32, wp: u32) -> bool {
        self.warp(dev, sm, wp).broken
    }

    fn warp_timestamp(&self, dev: u32, sm: u32, wp: u32) -> Option<u64> {
        self.warp(dev, sm, wp).timestamp
    }

    fn warp_grid_id(&self, dev: u32, sm: u32, wp: u32) -> GridId {
        self.warp(dev, sm, wp).grid_id
    }

    fn warp_block_idx(&self, dev: u32, sm: u32, wp: u32) -> Dim3 {
        self.warp(dev, sm, wp).block_idx
    }

    fn warp_cluster_idx(&self, dev: u32, sm: u32, wp: u32) -> Dim3 {
        self.warp(dev, sm, wp).cluster_idx
    }

    fn lane_valid(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> bool {
        self.lane(dev, sm, wp, ln).valid
    }

    fn lane_active(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> bool {
        self.lane(dev, sm, wp, ln).active
    }

    fn lane_exception(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> Option<Exception> {
        self.lane(dev, sm, wp, ln).exception
    }

    fn lane_timestamp(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> Option<u64> {
        self.lane(dev, sm, wp, ln).timestamp
    }

    fn lane_pc(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> u64 {
        self.lane(dev, sm, wp, ln).pc
    }

    fn lane_thread_idx(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> Dim3 {
        self.lane(dev, sm, wp, ln).thread_idx
    }

    fn clock(&self) -> u64 {
        self.clock
    }

    fn breakpoint_at(&self, dev: u32, pc: u64) -> bool {
        self.devices[dev as usize].breakpoints.contains(&pc)
    }

    fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    fn grid_info(&self, dev: u32, grid_id: GridId) -> Result<GridInfo, StateError> {
        self.grid_queries.set(self.grid_queries.get() + 1);
        self.grids
            .get(&(dev, grid_id))
            .map(|grid| grid.info)
            .ok_or(StateError::GridNotFound { dev, grid_id })
    }

    fn grid_status(&self, dev: u32, grid_id: GridId) -> Result<GridStatus, StateError> {
        self.grid_queries.set(self.grid_queries.get() + 1);
        self.grids
            .get(&(dev, grid_id))
            .map(|grid| grid.status)
            .ok_or(StateError::GridNotFound { dev, grid_id })
    }
}

impl Snapshot {
    fn sm(&self, dev: u32, sm: u32) -> &SmSnapshot {
        &self.devices[dev as usize].sms[sm as usize]
    }

    fn warp(&self, dev: u32, sm: u32, wp: u32) -> &WarpSnapshot {
        &self.sm(dev, sm).warps[wp as usize]
    }

    fn lane(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> &LaneSnapshot {
        &self.warp(dev, sm, wp).lanes[ln as usize]
    }
}
