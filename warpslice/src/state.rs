//! The interface through which the engine reads device state.
//!
//! A [`DeviceState`] is a point-in-time snapshot of the hardware: the
//! engine never mutates it, and any query result is only meaningful
//! for the snapshot it was built from.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::coords::Dim3;
use crate::kernel::GridId;
use crate::kernel::GridStatus;
use crate::kernel::KernelId;
use crate::kernel::KernelTable;

/// Errors reported by a state provider.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("grid {grid_id} not found on device {dev}")]
    GridNotFound { dev: u32, grid_id: GridId },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Grid attributes fetched on demand from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridInfo {
    /// The cluster dimension the grid was launched with. All zero when
    /// the launch does not use clusters.
    pub cluster_dim: Dim3,
}

/// An exception reported on a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exception {
    IllegalAddress,
    IllegalInstruction,
    MisalignedAddress,
    WarpAssert,
    StackOverflow,
    /// A provider-specific exception code.
    Other(u32),
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::IllegalAddress => write!(f, "illegal address"),
            Exception::IllegalInstruction => write!(f, "illegal instruction"),
            Exception::MisalignedAddress => write!(f, "misaligned address"),
            Exception::WarpAssert => write!(f, "warp assert"),
            Exception::StackOverflow => write!(f, "stack overflow"),
            Exception::Other(code) => write!(f, "exception {}", code),
        }
    }
}

/// Read access to device state.
///
/// Counts are per device; SMs, warps and lanes are numbered from zero.
/// The lane and warp accessors are only called for indices within the
/// reported counts. Warp identity accessors (`warp_grid_id`,
/// `warp_block_idx`, `warp_cluster_idx`, `warp_kernel`) and the lane
/// accessors `lane_pc` and `lane_thread_idx` are only called for valid
/// warps and lanes respectively.
pub trait DeviceState {
    fn num_devices(&self) -> u32;
    fn num_sms(&self, dev: u32) -> u32;
    fn num_warps(&self, dev: u32) -> u32;
    fn num_lanes(&self, dev: u32) -> u32;

    fn sm_valid(&self, dev: u32, sm: u32) -> bool;
    fn sm_has_exception(&self, dev: u32, sm: u32) -> bool;

    /// Whether the warp slot is occupied. The engine additionally
    /// requires the enclosing SM to be valid.
    fn warp_valid(&self, dev: u32, sm: u32, wp: u32) -> bool;
    /// Whether the warp is stopped at a trap.
    fn warp_broken(&self, dev: u32, sm: u32, wp: u32) -> bool;
    /// The logical clock value at which the warp last changed state,
    /// if known.
    fn warp_timestamp(&self, dev: u32, sm: u32, wp: u32) -> Option<u64>;
    fn warp_grid_id(&self, dev: u32, sm: u32, wp: u32) -> GridId;
    fn warp_block_idx(&self, dev: u32, sm: u32, wp: u32) -> Dim3;
    fn warp_cluster_idx(&self, dev: u32, sm: u32, wp: u32) -> Dim3;

    /// The kernel the warp is executing. Resolved through the kernel
    /// table by default.
    fn warp_kernel(&self, dev: u32, sm: u32, wp: u32) -> Option<KernelId> {
        let grid_id = self.warp_grid_id(dev, sm, wp);
        self.kernels()
            .find_by_grid_id(dev, grid_id)
            .map(|kernel| kernel.id())
    }

    fn lane_valid(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> bool;
    fn lane_active(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> bool;
    fn lane_exception(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> Option<Exception>;
    fn lane_timestamp(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> Option<u64>;
    fn lane_pc(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> u64;
    fn lane_thread_idx(&self, dev: u32, sm: u32, wp: u32, ln: u32) -> Dim3;

    /// The current logical clock. Units whose timestamp is older are
    /// stale.
    fn clock(&self) -> u64;

    /// Whether a breakpoint is inserted at `pc` on device `dev`.
    fn breakpoint_at(&self, dev: u32, pc: u64) -> bool;

    fn kernels(&self) -> &KernelTable;

    fn grid_info(&self, dev: u32, grid_id: GridId) -> Result<GridInfo, StateError>;
    fn grid_status(&self, dev: u32, grid_id: GridId) -> Result<GridStatus, StateError>;
}
