//! Property-based tests for the counting sort:
//! - both scan strategies produce the exclusive prefix sum, at block edges and random sizes
//! - scatter is a bijection that groups particles by cell

use std::sync::atomic::AtomicU32;

use hashgrid_particles::{
    floating_type_mod::FT,
    grid::UniformGrid,
    hash_count::hash_count,
    invariants::{check_cell_partition, check_sort_bijection},
    prefix_sum::{exclusive_scan_decoupled, exclusive_scan_reduce_then_scan, num_scan_blocks, ScanState},
    scatter::{scatter, SortedParticles},
    simulation_parameters::SimulationParams,
    vec4f, V4,
};
use proptest::prelude::*;

const WORKGROUP_SIZE: usize = 8;
const BLOCK_LEN: usize = 2 * WORKGROUP_SIZE;

fn reference_exclusive_scan(input: &[u32]) -> Vec<u32> {
    let mut acc = 0;
    input
        .iter()
        .map(|&x| {
            let prefix = acc;
            acc += x;
            prefix
        })
        .collect()
}

/// Sizes around the block length are the interesting ones.
fn scan_len() -> impl Strategy<Value = usize> {
    prop_oneof![
        Just(0),
        Just(1),
        Just(BLOCK_LEN - 1),
        Just(BLOCK_LEN),
        Just(BLOCK_LEN + 1),
        Just(BLOCK_LEN * BLOCK_LEN + 1),
        0usize..2000,
    ]
}

fn scan_input() -> impl Strategy<Value = Vec<u32>> {
    scan_len().prop_flat_map(|len| prop::collection::vec(0u32..20, len..=len))
}

fn particle_position() -> impl Strategy<Value = V4> {
    (-1.0 as FT..1.0, -1.0 as FT..1.0, -1.0 as FT..1.0).prop_map(|(x, y, z)| vec4f(x, y, z, 1.))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn decoupled_look_back_matches_reference(input in scan_input()) {
        let mut output = vec![u32::MAX; input.len()];
        let state = ScanState::new(num_scan_blocks(input.len(), WORKGROUP_SIZE));
        exclusive_scan_decoupled(&input[..], &mut output, &state, WORKGROUP_SIZE, 1 << 20);
        prop_assert_eq!(output, reference_exclusive_scan(&input));
    }

    #[test]
    fn reduce_then_scan_matches_reference(input in scan_input()) {
        let mut output = vec![u32::MAX; input.len()];
        exclusive_scan_reduce_then_scan(&input[..], &mut output, WORKGROUP_SIZE);
        prop_assert_eq!(output, reference_exclusive_scan(&input));
    }

    #[test]
    fn sort_is_a_bijection_grouped_by_cell(positions in prop::collection::vec(particle_position(), 0..600)) {
        let mut params = SimulationParams::default();
        params.grid_size = [8, 8, 8];
        params.particle_radius = 1. / 8.;
        params.workgroup_size = WORKGROUP_SIZE as u32;
        let grid = UniformGrid::new(&params);

        let n = positions.len();
        let velocities: Vec<V4> = (0..n).map(|i| vec4f(i as FT, 0., 0., 0.)).collect();
        let mut cell_hash = vec![0; n];
        let mut cell_rank = vec![0; n];
        let cell_count: Vec<AtomicU32> = (0..grid.num_cells()).map(|_| AtomicU32::new(0)).collect();
        hash_count(&grid, &positions, &mut cell_hash, &mut cell_rank, &cell_count);

        let mut cell_start = vec![0; grid.num_cells()];
        let state = ScanState::new(num_scan_blocks(grid.num_cells(), WORKGROUP_SIZE));
        exclusive_scan_decoupled(&cell_count[..], &mut cell_start, &state, WORKGROUP_SIZE, 1 << 20);
        prop_assert_eq!(check_cell_partition(&cell_start, &cell_count[..], n), Ok(()));

        let mut sorted = SortedParticles::new(n);
        scatter(&positions, &velocities, &cell_hash, &cell_rank, &cell_start, &mut sorted);
        prop_assert_eq!(check_sort_bijection(&sorted.original_index), Ok(()));

        let mut previous_hash = 0;
        for slot in 0..n {
            let i = sorted.original_index[slot] as usize;
            prop_assert_eq!(sorted.position[slot], positions[i]);
            prop_assert_eq!(sorted.velocity[slot], velocities[i]);

            let hash = grid.hash_position(sorted.position[slot].xyz());
            prop_assert!(hash >= previous_hash);
            previous_hash = hash;
        }
    }
}
