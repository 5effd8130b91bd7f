//! Kernels known to the debugger and their launch hierarchy.
//!
//! A [`Kernel`] is created when the state provider reports a launch,
//! invalidated when the provider signals that its cached state is
//! stale, and destroyed when the kernel exits. Attributes that require
//! a round trip to the provider (cluster dimension, grid status, the
//! formatted argument list, the nesting depth) are fetched lazily and
//! cached on the kernel.

use std::cell::Cell;
use std::cell::OnceCell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::compare::CoordOrder;
use crate::config::Config;
use crate::coord_set::Query;
use crate::coord_set::QueryError;
use crate::coord_set::Select;
use crate::coords;
use crate::coords::Dim3;
use crate::coords::Field;
use crate::coords::Granularity;
use crate::state::DeviceState;
use crate::state::StateError;

/// Unique per debugging session.
pub type KernelId = u64;

/// Unique per device.
pub type GridId = u64;

/// The name given to kernels whose entry point has no symbol.
pub const INTERNAL_KERNEL_NAME: &str = "<internal>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelType {
    System,
    Application,
}

/// Where a kernel was launched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelOrigin {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridStatus {
    Invalid,
    Pending,
    Active,
    Sleeping,
    Terminated,
    Undetermined,
}

/// The attributes reported by the provider when a kernel is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelLaunch {
    pub kernel_id: KernelId,
    pub dev: u32,
    pub grid_id: GridId,
    pub module_id: u64,
    /// Virtual address of the entry function.
    pub entry: u64,
    pub grid_dim: Dim3,
    pub block_dim: Dim3,
    pub cluster_dim: Dim3,
    pub kernel_type: KernelType,
    pub origin: KernelOrigin,
    /// The grid that launched this one, for device-side launches.
    pub parent_grid_id: Option<GridId>,
}

/// The source of kernel arguments: the host debugger's frame machinery.
pub trait FrameSource {
    /// The kernel the debugger is currently focused on, if any.
    fn focused_kernel(&self) -> Option<KernelId>;

    /// The formatted arguments of the outermost frame of the focused
    /// thread.
    fn outermost_frame_args(&self) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Args {
    #[default]
    Unpopulated,
    /// Formatting failed; the kernel will never report arguments.
    Unavailable,
    Known(String),
}

/// A kernel launched on a device.
#[derive(Debug)]
pub struct Kernel {
    launch: KernelLaunch,
    name: String,
    dimensions: String,
    launched: Cell<bool>,
    depth: OnceCell<u32>,
    cluster_dim: Cell<Option<Dim3>>,
    grid_status: Cell<Option<GridStatus>>,
    args: RefCell<Args>,
}

impl Kernel {
    /// Create a kernel from its launch attributes. `name` is the symbol
    /// of the entry function, if the entry point has one.
    pub fn new(launch: KernelLaunch, name: Option<String>) -> Self {
        let dimensions = format!("<<<{},{}>>>", launch.grid_dim, launch.block_dim);
        Self {
            name: name.unwrap_or_else(|| INTERNAL_KERNEL_NAME.to_string()),
            dimensions,
            launched: Cell::new(false),
            depth: OnceCell::new(),
            cluster_dim: Cell::new(Some(launch.cluster_dim)),
            grid_status: Cell::new(None),
            args: RefCell::new(Args::Unpopulated),
            launch,
        }
    }

    pub fn id(&self) -> KernelId {
        self.launch.kernel_id
    }

    pub fn dev(&self) -> u32 {
        self.launch.dev
    }

    pub fn grid_id(&self) -> GridId {
        self.launch.grid_id
    }

    pub fn module_id(&self) -> u64 {
        self.launch.module_id
    }

    pub fn entry(&self) -> u64 {
        self.launch.entry
    }

    pub fn grid_dim(&self) -> Dim3 {
        self.launch.grid_dim
    }

    pub fn block_dim(&self) -> Dim3 {
        self.launch.block_dim
    }

    pub fn kernel_type(&self) -> KernelType {
        self.launch.kernel_type
    }

    pub fn origin(&self) -> KernelOrigin {
        self.launch.origin
    }

    pub fn parent_grid_id(&self) -> Option<GridId> {
        self.launch.parent_grid_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The launch configuration, formatted as `<<<(gx,gy,gz),(bx,by,bz)>>>`.
    pub fn dimensions(&self) -> &str {
        &self.dimensions
    }

    /// Whether the kernel has been seen on the hardware.
    pub fn launched(&self) -> bool {
        self.launched.get()
    }

    pub fn set_launched(&self, launched: bool) {
        self.launched.set(launched);
    }

    /// The nesting level of the kernel: 0 for host launches, the
    /// parent's depth plus one otherwise. Computed once and never
    /// invalidated.
    ///
    /// # Panics
    ///
    /// Panics if the parent grid is not in `kernels`.
    pub fn depth(&self, kernels: &KernelTable) -> u32 {
        *self.depth.get_or_init(|| match self.parent_grid_id() {
            None => 0,
            Some(parent_grid_id) => {
                let parent = kernels
                    .find_by_grid_id(self.dev(), parent_grid_id)
                    .unwrap_or_else(|| {
                        panic!(
                            "kernel {}: parent grid {} not found on device {}",
                            self.id(),
                            parent_grid_id,
                            self.dev()
                        )
                    });
                parent.depth(kernels) + 1
            }
        })
    }

    /// The kernels launched by this one.
    pub fn children<'a>(&self, kernels: &'a KernelTable) -> Vec<&'a Kernel> {
        kernels
            .iter()
            .filter(|kernel| {
                kernel.dev() == self.dev() && kernel.parent_grid_id() == Some(self.grid_id())
            })
            .collect()
    }

    /// The cluster dimension of the launch. All zero when clusters are
    /// not in use. Fetched from the provider after an invalidation.
    pub fn cluster_dim<S: DeviceState + ?Sized>(&self, state: &S) -> Result<Dim3, StateError> {
        if let Some(cluster_dim) = self.cluster_dim.get() {
            return Ok(cluster_dim);
        }
        let cluster_dim = state.grid_info(self.dev(), self.grid_id())?.cluster_dim;
        self.cluster_dim.set(Some(cluster_dim));
        Ok(cluster_dim)
    }

    pub fn grid_status<S: DeviceState + ?Sized>(
        &self,
        state: &S,
    ) -> Result<GridStatus, StateError> {
        if let Some(status) = self.grid_status.get() {
            return Ok(status);
        }
        let status = state.grid_status(self.dev(), self.grid_id())?;
        self.grid_status.set(Some(status));
        Ok(status)
    }

    /// True if the grid is active or sleeping on the device.
    pub fn present<S: DeviceState + ?Sized>(&self, state: &S) -> Result<bool, StateError> {
        Ok(matches!(
            self.grid_status(state)?,
            GridStatus::Active | GridStatus::Sleeping
        ))
    }

    /// The `Display` form followed by whether the grid is present on
    /// the device, which needs a provider query.
    pub fn describe<S: DeviceState + ?Sized>(&self, state: &S) -> Result<String, StateError> {
        let present = if self.present(state)? { "yes" } else { "no" };
        Ok(format!("{self}\n    present     : {present}"))
    }

    /// Drop cached provider state. The depth is constant for the
    /// lifetime of the kernel and is kept, as are the arguments.
    pub fn invalidate(&self) {
        tracing::trace!("kernel {}: invalidate", self.id());
        self.grid_status.set(None);
        self.cluster_dim.set(None);
    }

    /// Populate the argument cache from the outermost frame of the
    /// focused thread. Does nothing unless the debugger is focused on
    /// this kernel. A formatting failure is cached: the kernel then
    /// never reports arguments.
    pub fn populate_args(&self, frames: &dyn FrameSource) {
        let mut args = self.args.borrow_mut();
        if *args != Args::Unpopulated {
            tracing::trace!("kernel {}: populate_args (cached)", self.id());
            return;
        }
        if frames.focused_kernel() != Some(self.id()) {
            tracing::trace!(
                "kernel {}: populate_args - skipping, not focused on kernel",
                self.id()
            );
            return;
        }
        match frames.outermost_frame_args() {
            Ok(text) => {
                tracing::trace!("kernel {}: populate_args: {}", self.id(), text);
                *args = Args::Known(text);
            }
            Err(err) => {
                tracing::trace!("kernel {}: populate_args failed: {:#}", self.id(), err);
                *args = Args::Unavailable;
            }
        }
    }

    /// The formatted kernel arguments, populating them first if needed.
    pub fn args(&self, frames: &dyn FrameSource) -> Option<String> {
        self.populate_args(frames);
        match &*self.args.borrow() {
            Args::Known(text) => Some(text.clone()),
            Args::Unpopulated | Args::Unavailable => None,
        }
    }

    /// The SMs of the kernel's device on which the kernel has a valid
    /// warp, indexed by SM number.
    pub fn sms_mask<S: DeviceState + ?Sized>(&self, state: &S) -> Result<Vec<bool>, QueryError> {
        let mut mask = vec![false; state.num_sms(self.dev()) as usize];
        let sms = Query::new(Granularity::Sms)
            .filter(coords!(dev = self.dev(), kernel = self.id()))
            .select(Select::VALID)
            .order(CoordOrder::Physical)
            .eval(state)?;
        for coord in &sms {
            if let Field::Value(sm) = coord.physical.sm {
                mask[sm as usize] = true;
            }
        }
        Ok(mask)
    }

    /// Whether launch and exit events of this kernel should be
    /// reported under `config`.
    pub fn should_report_event(&self, kernels: &KernelTable, config: &Config) -> bool {
        let max_depth = config.kernel_events_depth;
        if max_depth != 0 && self.depth(kernels) >= max_depth {
            return false;
        }
        match self.kernel_type() {
            KernelType::System => config.kernel_events_system,
            KernelType::Application => config.kernel_events_application,
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Kernel {}:", self.id())?;
        writeln!(f, "    name        : {}", self.name)?;
        writeln!(f, "    device id   : {}", self.dev())?;
        writeln!(f, "    grid id     : {}", self.grid_id())?;
        writeln!(f, "    module id   : {:#x}", self.module_id())?;
        writeln!(f, "    entry point : {:#x}", self.entry())?;
        writeln!(f, "    dimensions  : {}", self.dimensions)?;
        write!(
            f,
            "    launched    : {}",
            if self.launched() { "yes" } else { "no" }
        )
    }
}

/// All kernels of the session, keyed by kernel id.
#[derive(Debug, Default)]
pub struct KernelTable {
    kernels: BTreeMap<KernelId, Kernel>,
}

impl KernelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a kernel, returning the kernel previously registered under
    /// the same id.
    pub fn insert(&mut self, kernel: Kernel) -> Option<Kernel> {
        tracing::trace!("kernel {}: created ({})", kernel.id(), kernel.name());
        self.kernels.insert(kernel.id(), kernel)
    }

    pub fn remove(&mut self, id: KernelId) -> Option<Kernel> {
        let kernel = self.kernels.remove(&id);
        if kernel.is_some() {
            tracing::trace!("kernel {}: destroyed", id);
        }
        kernel
    }

    pub fn get(&self, id: KernelId) -> Option<&Kernel> {
        self.kernels.get(&id)
    }

    pub fn find_by_grid_id(&self, dev: u32, grid_id: GridId) -> Option<&Kernel> {
        self.kernels
            .values()
            .find(|kernel| kernel.dev() == dev && kernel.grid_id() == grid_id)
    }

    /// Kernels in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Kernel> {
        self.kernels.values()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn invalidate_all(&self) {
        for kernel in self.kernels.values() {
            kernel.invalidate();
        }
    }

    /// Populate arguments of every kernel that does not have them yet.
    pub fn update_args(&self, frames: &dyn FrameSource) {
        for kernel in self.kernels.values() {
            kernel.populate_args(frames);
        }
    }

    /// The kernels with at least one valid warp on the hardware. Each
    /// of them is marked as launched.
    pub fn resident_kernels<S: DeviceState + ?Sized>(
        &self,
        state: &S,
    ) -> Result<Vec<&Kernel>, QueryError> {
        let coords = Query::new(Granularity::Kernels)
            .select(Select::VALID)
            .eval(state)?;
        let resident: Vec<&Kernel> = coords
            .iter()
            .filter_map(|coord| coord.logical.kernel_id.as_value().copied())
            .filter_map(|id| self.get(id))
            .collect();
        for kernel in &resident {
            kernel.set_launched(true);
        }
        Ok(resident)
    }
}
