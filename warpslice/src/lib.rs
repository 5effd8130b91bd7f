//! Enumeration of the execution units of a parallel device for
//! debuggers.
//!
//! Execution units are addressed in two ways: physically, by device,
//! SM, warp and lane; and logically, by kernel, grid, cluster, block
//! and thread. A [`Coords`] carries both addresses, and any of its
//! fields may be a wildcard.
//!
//! The core of the crate is [`Query`], which walks a [`DeviceState`]
//! snapshot and returns the units matching a filter coordinate and a
//! set of [`Select`] criteria, projected to a [`Granularity`] and
//! ordered by a [`CoordCompare`]. Around it sit a disjoint interval
//! index ([`RangeMap`]), the kernel launch hierarchy
//! ([`kernel::KernelTable`]), and helpers for picking the debugger's
//! focus ([`focus`]).

pub mod compare;
pub mod config;
pub mod coord_set;
pub mod coords;
pub mod focus;
pub mod kernel;
mod parse;
pub mod rangemap;
pub mod sim;
pub mod state;

pub use compare::CoordCompare;
pub use compare::CoordOrder;
pub use coord_set::CoordSet;
pub use coord_set::Query;
pub use coord_set::QueryError;
pub use coord_set::Select;
pub use coords::Coords;
pub use coords::Dim3;
pub use coords::Field;
pub use coords::Granularity;
pub use coords::Idx3;
pub use coords::LogicalCoords;
pub use coords::PhysicalCoords;
pub use parse::ParseError;
pub use rangemap::RangeMap;
pub use state::DeviceState;
pub use state::StateError;
