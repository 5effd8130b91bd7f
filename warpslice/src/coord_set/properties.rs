//! Property tests for the enumeration engine over randomly populated
//! snapshots.

use std::collections::HashSet;

use itertools::iproduct;
use proptest::prelude::*;

use super::*;
use crate::coords::Dim3;
use crate::kernel::KernelLaunch;
use crate::kernel::KernelOrigin;
use crate::kernel::KernelType;
use crate::sim::Snapshot;
use crate::state::Exception;

const LANES: u32 = 4;

#[derive(Debug, Clone)]
struct WarpPlan {
    kernel: Option<u64>,
    block: u32,
    active: u32,
    broken: bool,
    exception_lane: Option<u32>,
    stale: bool,
}

fn arb_warp() -> impl Strategy<Value = WarpPlan> {
    (
        prop::option::of(0u64..2),
        0u32..3,
        0u32..=LANES,
        any::<bool>(),
        prop::option::of(0u32..LANES),
        any::<bool>(),
    )
        .prop_map(
            |(kernel, block, active, broken, exception_lane, stale)| WarpPlan {
                kernel,
                block,
                active,
                broken,
                exception_lane,
                stale,
            },
        )
}

fn build(devices: u32, sms: u32, warps: u32, clustered: bool, plans: Vec<WarpPlan>) -> Snapshot {
    let mut state = Snapshot::new(devices, sms, warps, LANES);
    for dev in 0..devices {
        for k in 0..2u64 {
            let kernel_id = u64::from(dev) * 2 + k + 1;
            state.launch(KernelLaunch {
                kernel_id,
                dev,
                grid_id: k + 1,
                module_id: 0,
                entry: 0x100 * kernel_id,
                grid_dim: Dim3::new(3, 1, 1),
                block_dim: Dim3::new(8, 1, 1),
                cluster_dim: if clustered && k == 1 {
                    Dim3::new(1, 1, 1)
                } else {
                    Dim3::default()
                },
                kernel_type: KernelType::Application,
                origin: KernelOrigin::Cpu,
                parent_grid_id: None,
            });
        }
        state.insert_breakpoint(dev, 0x100 * (u64::from(dev) * 2 + 1));
    }
    state.set_clock(1);

    for ((dev, sm, wp), plan) in iproduct!(0..devices, 0..sms, 0..warps).zip(plans) {
        let Some(k) = plan.kernel else {
            continue;
        };
        let kernel_id = u64::from(dev) * 2 + k + 1;
        let block_idx = Dim3::new(plan.block, 0, 0);
        state.populate_warp(dev, sm, wp, kernel_id, block_idx, (wp % 2) * LANES, plan.active);
        state.warp_mut(dev, sm, wp).broken = plan.broken;
        if plan.stale {
            state.warp_mut(dev, sm, wp).timestamp = Some(0);
        }
        if let Some(ln) = plan.exception_lane {
            state.lane_mut(dev, sm, wp, ln).exception = Some(Exception::IllegalAddress);
            state.sm_mut(dev, sm).exception = true;
        }
    }
    state
}

fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
    (1u32..=2, 1u32..=3, 1u32..=3, any::<bool>())
        .prop_flat_map(|(devices, sms, warps, clustered)| {
            let n = (devices * sms * warps) as usize;
            (
                Just((devices, sms, warps, clustered)),
                prop::collection::vec(arb_warp(), n),
            )
        })
        .prop_map(|((devices, sms, warps, clustered), plans)| {
            build(devices, sms, warps, clustered, plans)
        })
}

fn arb_field(max: u32) -> impl Strategy<Value = Field<u32>> {
    prop_oneof![
        3 => Just(Field::Wildcard),
        1 => (0..max).prop_map(Field::Value),
    ]
}

fn arb_filter() -> impl Strategy<Value = Coords> {
    (
        arb_field(2),
        arb_field(3),
        arb_field(3),
        arb_field(LANES),
        prop_oneof![
            3 => Just(Field::Wildcard),
            1 => (1u64..=4).prop_map(Field::Value),
        ],
        prop_oneof![
            2 => Just(Idx3::WILDCARD),
            1 => Just(Idx3::Ignore),
            1 => Just(Idx3::new(0, 0, 0)),
        ],
        prop_oneof![
            2 => Just(Idx3::WILDCARD),
            1 => (0u32..3).prop_map(|x| Idx3::new(x, 0, 0)),
        ],
    )
        .prop_map(|(dev, sm, wp, ln, kernel_id, cluster_idx, block_idx)| Coords {
            physical: PhysicalCoords { dev, sm, wp, ln },
            logical: LogicalCoords {
                kernel_id,
                cluster_idx,
                block_idx,
                ..LogicalCoords::wild()
            },
        })
}

fn arb_granularity() -> impl Strategy<Value = Granularity> {
    prop::sample::select(Granularity::ALL.to_vec())
}

fn arb_select() -> impl Strategy<Value = Select> {
    any::<u32>().prop_map(|bits| Select::from_bits_truncate(bits) - Select::SINGLE)
}

proptest! {
    #[test]
    fn results_match_filter_at_granularity(
        state in arb_snapshot(),
        filter in arb_filter(),
        granularity in arb_granularity(),
        select in arb_select()
    ) {
        let set = Query::new(granularity)
            .filter(filter)
            .select(select)
            .eval(&state)
            .unwrap();
        let projected = filter.project(granularity);
        for coords in &set {
            prop_assert_eq!(coords.project(granularity), *coords);
            prop_assert!(projected.matches(coords), "{} does not match {}", coords, filter);
        }
    }

    #[test]
    fn queries_are_idempotent(
        state in arb_snapshot(),
        filter in arb_filter(),
        granularity in arb_granularity(),
        select in arb_select()
    ) {
        let query = Query::new(granularity).filter(filter).select(select);
        let first = query.eval(&state).unwrap();
        let second = query.eval(&state).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn kernels_and_blocks_never_repeat(
        state in arb_snapshot(),
        filter in arb_filter(),
        select in arb_select()
    ) {
        let kernels = Query::new(Granularity::Kernels)
            .filter(filter)
            .select(select)
            .eval(&state)
            .unwrap();
        let mut seen = HashSet::new();
        for coords in &kernels {
            prop_assert!(seen.insert(coords.logical.kernel_id));
        }

        let blocks = Query::new(Granularity::Blocks)
            .filter(filter)
            .select(select)
            .eval(&state)
            .unwrap();
        let mut seen = HashSet::new();
        for coords in &blocks {
            prop_assert!(seen.insert((coords.logical.kernel_id, coords.logical.block_idx)));
        }
    }

    #[test]
    fn single_is_first_in_physical_order(
        state in arb_snapshot(),
        filter in arb_filter(),
        granularity in prop::sample::select(vec![
            Granularity::Devices,
            Granularity::Sms,
            Granularity::Warps,
            Granularity::Lanes,
            Granularity::Threads,
        ]),
        select in arb_select()
    ) {
        let query = Query::new(granularity)
            .filter(filter)
            .order(CoordOrder::Physical);
        let all = query.clone().select(select).eval(&state).unwrap();
        let single = query.select(select | Select::SINGLE).eval(&state).unwrap();
        prop_assert!(single.len() <= 1);
        prop_assert_eq!(single.first(), all.first());
    }
}
