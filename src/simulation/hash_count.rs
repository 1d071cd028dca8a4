use std::sync::atomic::{AtomicU32, Ordering};

use crate::{concurrency::par_iter_mut2, grid::UniformGrid, V4};

/// Computes the cell hash of every particle and counts the particles per cell.
///
/// Every particle receives its rank within its cell from an atomic fetch-and-increment on
/// the cell counter, so the ranks of one cell are exactly `0..count` in an unspecified order.
/// `cell_count` has to be zeroed before the dispatch.
pub fn hash_count(
    grid: &UniformGrid,
    position: &[V4],
    cell_hash: &mut [u32],
    cell_rank: &mut [u32],
    cell_count: &[AtomicU32],
) {
    let n = position.len().min(cell_hash.len());
    par_iter_mut2(&mut cell_hash[..n], &mut cell_rank[..n], |i, p_hash, p_rank| {
        let hash = grid.hash_position(position[i].xyz());
        *p_hash = hash;
        *p_rank = cell_count[hash as usize].fetch_add(1, Ordering::Relaxed);
    });
}

pub fn clear_cell_counts(cell_count: &mut [AtomicU32]) {
    for count in cell_count.iter_mut() {
        *count.get_mut() = 0;
    }
}

#[cfg(test)]
fn hash_random_particles(num_particles: usize, grid_size: u32) -> (Vec<u32>, Vec<u32>, Vec<AtomicU32>) {
    use crate::{simulation_parameters::SimulationParams, vec4f};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut params = SimulationParams::default();
    params.grid_size = [grid_size; 3];
    params.particle_radius = 1. / grid_size as crate::floating_type_mod::FT;
    let grid = UniformGrid::new(&params);

    let mut rng = StdRng::seed_from_u64(7);
    let position: Vec<V4> = (0..num_particles)
        .map(|_| vec4f(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 1.))
        .collect();

    let mut cell_hash = vec![0; num_particles];
    let mut cell_rank = vec![0; num_particles];
    let cell_count: Vec<AtomicU32> = (0..grid.num_cells()).map(|_| AtomicU32::new(0)).collect();
    hash_count(&grid, &position, &mut cell_hash, &mut cell_rank, &cell_count);

    for i in 0..num_particles {
        assert_eq!(cell_hash[i], grid.hash_position(position[i].xyz()));
    }

    (cell_hash, cell_rank, cell_count)
}

#[test]
fn counts_sum_to_particle_count() {
    let (_, _, cell_count) = hash_random_particles(5000, 8);
    let total: u32 = cell_count.iter().map(|c| c.load(Ordering::Relaxed)).sum();
    assert_eq!(total, 5000);
}

#[test]
fn ranks_within_cell_have_no_gaps_or_duplicates() {
    let (cell_hash, cell_rank, cell_count) = hash_random_particles(5000, 4);

    let mut seen: Vec<Vec<u32>> = vec![Vec::new(); cell_count.len()];
    for (hash, rank) in cell_hash.iter().zip(cell_rank.iter()) {
        seen[*hash as usize].push(*rank);
    }

    for (cell, ranks) in seen.iter_mut().enumerate() {
        ranks.sort_unstable();
        let count = cell_count[cell].load(Ordering::Relaxed);
        assert_eq!(ranks.len() as u32, count);
        assert!(ranks.iter().cloned().eq(0..count));
    }
}

#[test]
fn clearing_resets_counts() {
    let (_, _, mut cell_count) = hash_random_particles(100, 4);
    clear_cell_counts(&mut cell_count);
    assert!(cell_count.iter().all(|c| c.load(Ordering::Relaxed) == 0));
}
