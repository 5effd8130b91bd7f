//! Canned queries used to choose the debugger's focus and to convert a
//! single lane between the physical and logical addressing schemes.

use crate::compare::CoordOrder;
use crate::coord_set::Query;
use crate::coord_set::QueryError;
use crate::coord_set::Select;
use crate::coords::Coords;
use crate::coords::Granularity;
use crate::coords::LogicalCoords;
use crate::coords::PhysicalCoords;
use crate::state::DeviceState;

fn first<S: DeviceState + ?Sized>(state: &S, query: Query) -> Result<Option<Coords>, QueryError> {
    Ok(query.eval(state)?.first().copied())
}

/// The first valid thread, in physical order of the device walk.
pub fn first_valid_thread<S: DeviceState + ?Sized>(
    state: &S,
) -> Result<Option<Coords>, QueryError> {
    first(
        state,
        Query::new(Granularity::Threads).select(Select::VALID | Select::SINGLE),
    )
}

/// The first valid thread whose warp is stopped at a trap in the
/// current clock period.
pub fn first_trap<S: DeviceState + ?Sized>(state: &S) -> Result<Option<Coords>, QueryError> {
    first(
        state,
        Query::new(Granularity::Threads)
            .select(Select::VALID | Select::TRAP | Select::CURRENT_CLOCK | Select::SINGLE),
    )
}

/// The first lane with an exception.
pub fn first_exception<S: DeviceState + ?Sized>(
    state: &S,
) -> Result<Option<Coords>, QueryError> {
    first(
        state,
        Query::new(Granularity::Lanes).select(Select::EXCEPTION | Select::SINGLE),
    )
}

/// The valid lane at a breakpoint nearest to `origin`, by physical
/// distance.
pub fn nearest_at_breakpoint<S: DeviceState + ?Sized>(
    state: &S,
    origin: &Coords,
) -> Result<Option<Coords>, QueryError> {
    first(
        state,
        Query::new(Granularity::Lanes)
            .select(Select::VALID | Select::BREAKPOINT)
            .order(CoordOrder::Physical)
            .origin(*origin),
    )
}

/// The logical coordinates of the valid lane at `physical`. Wildcard
/// fields of `physical` match any lane.
pub fn logical_of<S: DeviceState + ?Sized>(
    state: &S,
    physical: &PhysicalCoords,
) -> Result<Option<LogicalCoords>, QueryError> {
    let filter = Coords {
        physical: *physical,
        logical: LogicalCoords::wild(),
    };
    let found = first(
        state,
        Query::new(Granularity::Threads)
            .filter(filter)
            .select(Select::VALID | Select::SINGLE),
    )?;
    Ok(found.map(|coords| coords.logical))
}

/// The physical coordinates of the valid thread at `logical`.
pub fn physical_of<S: DeviceState + ?Sized>(
    state: &S,
    logical: &LogicalCoords,
) -> Result<Option<PhysicalCoords>, QueryError> {
    let filter = Coords {
        physical: PhysicalCoords::wild(),
        logical: *logical,
    };
    let found = first(
        state,
        Query::new(Granularity::Threads)
            .filter(filter)
            .select(Select::VALID | Select::SINGLE),
    )?;
    Ok(found.map(|coords| coords.physical))
}
