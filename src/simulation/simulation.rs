use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

use crate::simulation::{
    collide::collide,
    color_map::particle_colors,
    concurrency::par_map_reduce,
    grid::UniformGrid,
    hash_count::{clear_cell_counts, hash_count},
    integrate::integrate,
    invariants::{check_cell_partition, check_sort_bijection, InvariantViolation},
    pipeline::{FrameSchedule, Stage},
    prefix_sum::{num_scan_blocks, prefix_sum, ScanState},
    scatter::{scatter, SortedParticles},
    scene::{grid_block, sphere_block},
    simulation_parameters::{ConfigError, SimulationParams},
    statistics::{write_statistics, PerformanceCounters, ValueCounters},
};
use crate::{floating_type_mod::FT, vec4f, V3, V4};

/// Particles in the `[-1, 1]³` box, stepped by a fixed sequence of data-parallel stages:
/// integrate, hash into a uniform grid, counting-sort by cell and resolve contacts between
/// neighboring cells.
///
/// Particles are addressed by their canonical index for their whole lifetime. The cell-sorted
/// copies are frame scratch.
pub struct ParticleSystem {
    simulation_params: SimulationParams,
    grid: UniformGrid,
    schedule: FrameSchedule,

    position: Vec<V4>,
    velocity: Vec<V4>,
    colors: Vec<V4>,

    cell_hash: Vec<u32>,
    cell_rank: Vec<u32>,
    cell_count: Vec<AtomicU32>,
    scan_state: ScanState,
    cell_start: Vec<u32>,
    sorted: SortedParticles,

    frame: u64,

    pcounters: PerformanceCounters,
    vcounters: ValueCounters,
}

impl ParticleSystem {
    pub fn new(simulation_params: SimulationParams, counters_enabled: bool) -> Result<ParticleSystem, ConfigError> {
        Self::with_schedule(simulation_params, FrameSchedule::standard(), counters_enabled)
    }

    pub fn with_schedule(
        simulation_params: SimulationParams,
        schedule: FrameSchedule,
        counters_enabled: bool,
    ) -> Result<ParticleSystem, ConfigError> {
        simulation_params.validate()?;

        let n = simulation_params.num_particles as usize;
        let num_cells = simulation_params.num_cells();
        let num_blocks = num_scan_blocks(num_cells, simulation_params.workgroup_size as usize);

        log::info!(
            "{} particles, {:?} grid ({} cells), radius {}, {:?} scan over {} blocks",
            n,
            simulation_params.grid_size,
            num_cells,
            simulation_params.particle_radius,
            simulation_params.scan_strategy,
            num_blocks
        );
        log::debug!("frame schedule: {:?}", schedule.batches());

        Ok(ParticleSystem {
            grid: UniformGrid::new(&simulation_params),
            schedule,

            position: vec![vec4f(0., 0., 0., 1.); n],
            velocity: vec![V4::zeros(); n],
            colors: particle_colors(n),

            cell_hash: vec![0; n],
            cell_rank: vec![0; n],
            cell_count: (0..num_cells).map(|_| AtomicU32::new(0)).collect(),
            scan_state: ScanState::new(num_blocks),
            cell_start: vec![0; num_cells],
            sorted: SortedParticles::new(n),

            frame: 0,

            pcounters: PerformanceCounters::new(counters_enabled),
            vcounters: ValueCounters::new(counters_enabled),

            simulation_params,
        })
    }

    pub fn num_particles(&self) -> usize {
        self.position.len()
    }

    /// `Σ ½ |v|²` over all particles, with unit masses.
    pub fn kinetic_energy(&self) -> FT {
        par_map_reduce(
            self.velocity.len(),
            || 0.,
            |a, b| a + b,
            |i| 0.5 * self.velocity[i].xyz().norm_squared(),
        )
    }

    /// Copies the given records into the slots starting at `start`. Records past the last slot
    /// are dropped. Returns the number of slots written.
    pub fn write_particles(&mut self, start: usize, positions: &[V4], velocities: &[V4]) -> usize {
        let n = self.num_particles();
        let start = start.min(n);
        let count = positions.len().min(velocities.len()).min(n - start);
        self.position[start..start + count].copy_from_slice(&positions[..count]);
        self.velocity[start..start + count].copy_from_slice(&velocities[..count]);
        count
    }

    /// Places all particles on a cube lattice at rest, starting at the lower domain corner.
    pub fn reset_grid(&mut self, spacing: Option<FT>, jitter: Option<FT>, rng: &mut impl Rng) -> usize {
        let r = self.simulation_params.particle_radius;
        let (positions, velocities) = grid_block(
            self.num_particles(),
            r,
            spacing.unwrap_or(2. * r),
            jitter.unwrap_or(0.01 * r),
            rng,
        );
        self.write_particles(0, &positions, &velocities)
    }

    /// Overwrites the leading slots with a ball of particles around `center`. Returns how many
    /// particles were placed.
    pub fn add_sphere(&mut self, center: V3, radius_cells: u32, velocity: V3, rng: &mut impl Rng) -> usize {
        let r = self.simulation_params.particle_radius;
        let (positions, velocities) = sphere_block(
            center,
            radius_cells,
            velocity,
            2. * r,
            0.01 * r,
            self.num_particles(),
            rng,
        );
        self.write_particles(0, &positions, &velocities)
    }

    /// Advances the simulation by one frame of length `dt`.
    pub fn update(&mut self, dt: FT) {
        self.pcounters.begin("frame");

        let stages = self.schedule.stages().to_vec();
        for scheduled in stages {
            if scheduled.barrier_before {
                log::trace!("barrier before {}", scheduled.stage);
            }
            self.pcounters.begin(scheduled.stage.name());
            self.run_stage(scheduled.stage, dt);
            self.pcounters.end(scheduled.stage.name());
        }

        self.pcounters.end("frame");
        self.frame += 1;

        self.record_frame_values();

        if self.simulation_params.check_invariants && self.has_sorted_state() {
            if let Err(violation) = self.check_invariants() {
                log::error!("frame {}: {}", self.frame, violation);
                panic!("invariant violated in frame {}: {}", self.frame, violation);
            }
        }
    }

    fn run_stage(&mut self, stage: Stage, dt: FT) {
        let simulation_params = &self.simulation_params;
        match stage {
            Stage::ClearScratch => {
                clear_cell_counts(&mut self.cell_count);
                self.scan_state.reset();
            }
            Stage::Integrate => integrate(simulation_params, dt, &mut self.position, &mut self.velocity),
            Stage::HashCount => hash_count(
                &self.grid,
                &self.position,
                &mut self.cell_hash,
                &mut self.cell_rank,
                &self.cell_count,
            ),
            Stage::PrefixSum => prefix_sum(
                simulation_params,
                &self.cell_count[..],
                &mut self.cell_start,
                &self.scan_state,
            ),
            Stage::Scatter => scatter(
                &self.position,
                &self.velocity,
                &self.cell_hash,
                &self.cell_rank,
                &self.cell_start,
                &mut self.sorted,
            ),
            Stage::Collide => collide(
                simulation_params,
                &self.grid,
                &self.sorted,
                &self.cell_start,
                &self.cell_count[..],
                &mut self.velocity,
            ),
        }
    }

    fn has_sorted_state(&self) -> bool {
        self.schedule.stages().iter().any(|s| s.stage == Stage::Scatter)
    }

    fn record_frame_values(&mut self) {
        if !self.vcounters.is_enabled() {
            return;
        }

        let (occupied, max_occupancy) = self
            .cell_count
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .fold((0u32, 0u32), |(occupied, max), c| (occupied + (c > 0) as u32, max.max(c)));

        self.vcounters.add_value("occupied-cells", occupied as FT);
        self.vcounters.add_value("max-cell-occupancy", max_occupancy as FT);
        self.vcounters
            .add_value("look-back-steps", self.scan_state.look_back_steps() as FT);
        self.vcounters
            .add_value("look-back-fallbacks", self.scan_state.fallbacks() as FT);

        log::debug!(
            "frame {}: {} occupied cells, at most {} particles per cell, {} look-back steps",
            self.frame,
            occupied,
            max_occupancy,
            self.scan_state.look_back_steps()
        );
    }

    /// Checks that the cell ranges partition the particles and that the sorted order is a
    /// permutation of the canonical indices.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        check_cell_partition(&self.cell_start, &self.cell_count[..], self.num_particles())?;
        check_sort_bijection(&self.sorted.original_index)
    }

    pub fn simulation_params(&self) -> &SimulationParams {
        &self.simulation_params
    }

    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    pub fn schedule(&self) -> &FrameSchedule {
        &self.schedule
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn positions(&self) -> &[V4] {
        &self.position
    }

    pub fn velocities(&self) -> &[V4] {
        &self.velocity
    }

    /// Per-particle RGBA display colors, indexed like the positions.
    pub fn colors(&self) -> &[V4] {
        &self.colors
    }

    /// Exclusive prefix sum of the cell counts from the last frame.
    pub fn cell_start(&self) -> &[u32] {
        &self.cell_start
    }

    pub fn cell_counts(&self) -> Vec<u32> {
        self.cell_count.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    pub fn sorted(&self) -> &SortedParticles {
        &self.sorted
    }

    pub fn scan_state(&self) -> &ScanState {
        &self.scan_state
    }

    pub fn write_statistics(&self) -> String {
        write_statistics(&self.pcounters, &self.vcounters)
    }
}

#[cfg(test)]
fn small_params(num_particles: u32) -> SimulationParams {
    let mut params = SimulationParams::default();
    params.num_particles = num_particles;
    params.grid_size = [16, 16, 16];
    params.particle_radius = 1. / 16.;
    params.check_invariants = true;
    params
}

#[test]
fn write_particles_truncates_at_the_end() {
    let mut particle_system = ParticleSystem::new(small_params(4), false).unwrap();
    let positions = vec![vec4f(0.5, 0.5, 0.5, 1.); 3];
    let velocities = vec![vec4f(0., 1., 0., 0.); 3];
    assert_eq!(particle_system.write_particles(2, &positions, &velocities), 2);
    assert_eq!(particle_system.write_particles(7, &positions, &velocities), 0);
    assert_eq!(particle_system.positions()[1], vec4f(0., 0., 0., 1.));
    assert_eq!(particle_system.positions()[3], positions[0]);
    assert_eq!(particle_system.velocities()[2], velocities[0]);
}

#[test]
fn write_particles_past_the_end_is_a_no_op() {
    let mut particle_system = ParticleSystem::new(small_params(4), false).unwrap();
    let positions = vec![vec4f(0.5, 0.5, 0.5, 1.); 3];
    let velocities = vec![vec4f(0., 1., 0., 0.); 3];
    let before = particle_system.positions().to_vec();

    assert_eq!(particle_system.write_particles(4, &positions, &velocities), 0);
    assert_eq!(particle_system.write_particles(usize::MAX, &positions, &velocities), 0);
    assert_eq!(particle_system.positions(), &before[..]);
    assert!(particle_system.velocities().iter().all(|v| *v == V4::zeros()));
}

#[test]
fn frame_keeps_sort_structures_consistent() {
    use rand::{rngs::StdRng, SeedableRng};

    let mut particle_system = ParticleSystem::new(small_params(500), true).unwrap();
    particle_system.reset_grid(None, None, &mut StdRng::seed_from_u64(1));

    for _ in 0..5 {
        particle_system.update(0.5);
    }
    assert_eq!(particle_system.frame(), 5);
    assert_eq!(particle_system.check_invariants(), Ok(()));
    assert_eq!(particle_system.scan_state().fallbacks(), 0);
    assert_eq!(particle_system.schedule().stages().len(), 6);

    // every sorted particle sits in the cell range it was counted in
    let counts = particle_system.cell_counts();
    assert_eq!(counts.iter().sum::<u32>(), 500);
    let sorted = particle_system.sorted();
    let grid = particle_system.grid();
    for slot in 0..sorted.len() {
        let hash = grid.hash_position(sorted.position[slot].xyz()) as usize;
        let start = particle_system.cell_start()[hash] as usize;
        assert!(slot >= start && slot < start + counts[hash] as usize);
    }
    assert!(particle_system.kinetic_energy() > 0.);

    let report = particle_system.write_statistics();
    assert!(report.contains("over 5 frames"));
    assert!(report.contains("occupied-cells"));
}

#[test]
fn rejects_invalid_parameters() {
    let mut params = small_params(10);
    params.particle_radius = 0.;
    assert!(matches!(
        ParticleSystem::new(params, false),
        Err(ConfigError::InvalidRadius(_))
    ));
}
