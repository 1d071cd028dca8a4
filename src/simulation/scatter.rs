use crate::{concurrency::par_iter_mut0, thread_safe_ptr::ThreadSafeMutSlice, V4};

/// Sorted copies of the particle attributes, valid for one frame.
pub struct SortedParticles {
    pub position: Vec<V4>,
    pub velocity: Vec<V4>,
    /// `original_index[slot]` is the canonical index of the particle stored in `slot`.
    pub original_index: Vec<u32>,
}

impl SortedParticles {
    pub fn new(num_particles: usize) -> SortedParticles {
        SortedParticles {
            position: vec![V4::zeros(); num_particles],
            velocity: vec![V4::zeros(); num_particles],
            original_index: vec![0; num_particles],
        }
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }
}

/// Counting-sort scatter: particle `i` goes to slot `cell_start[cell_hash[i]] + cell_rank[i]`.
///
/// The cell ranges `[cell_start[h], cell_start[h] + count[h])` partition the particle range and
/// the ranks inside one cell are unique, so every slot receives exactly one particle.
pub fn scatter(
    position: &[V4],
    velocity: &[V4],
    cell_hash: &[u32],
    cell_rank: &[u32],
    cell_start: &[u32],
    sorted: &mut SortedParticles,
) {
    let n = position.len().min(sorted.len());

    let sorted_position = ThreadSafeMutSlice::new(&mut sorted.position);
    let sorted_velocity = ThreadSafeMutSlice::new(&mut sorted.velocity);
    let original_index = ThreadSafeMutSlice::new(&mut sorted.original_index);

    par_iter_mut0(n, |i| {
        let dest = (cell_start[cell_hash[i] as usize] + cell_rank[i]) as usize;
        // SAFETY: destinations are unique across particles (see above)
        unsafe {
            sorted_position.write(dest, position[i]);
            sorted_velocity.write(dest, velocity[i]);
            original_index.write(dest, i as u32);
        }
    });
}

#[cfg(test)]
use crate::vec4f;

#[test]
fn scatter_groups_particles_by_cell() {
    // cells: 0 -> {1, 3}, 1 -> {}, 2 -> {0, 2, 4}
    let cell_hash = vec![2, 0, 2, 0, 2];
    let cell_rank = vec![1, 0, 0, 1, 2];
    let cell_start = vec![0, 2, 2];
    let position: Vec<V4> = (0..5).map(|i| vec4f(i as _, 0., 0., 1.)).collect();
    let velocity: Vec<V4> = (0..5).map(|i| vec4f(0., i as _, 0., 0.)).collect();

    let mut sorted = SortedParticles::new(5);
    scatter(&position, &velocity, &cell_hash, &cell_rank, &cell_start, &mut sorted);

    assert_eq!(sorted.original_index, vec![1, 3, 2, 0, 4]);
    for slot in 0..5 {
        let i = sorted.original_index[slot] as usize;
        assert_eq!(sorted.position[slot], position[i]);
        assert_eq!(sorted.velocity[slot], velocity[i]);
    }
}
