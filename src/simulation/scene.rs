use std::path::Path;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    floating_type_mod::FT,
    simulation::ParticleSystem,
    simulation_parameters::{read_file, LoadError},
    vec3f, vec4f, with_w, V3, V4,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SceneEmitter {
    /// Cubic lattice filling the particle slots in order, starting at the lower domain corner.
    /// Defaults: spacing `2r`, jitter `0.01 r`.
    Grid {
        #[serde(default)]
        spacing: Option<FT>,
        #[serde(default)]
        jitter: Option<FT>,
    },
    /// Lattice ball of `radius_cells` cells around `center`, written from slot 0 upward.
    Sphere {
        center: [FT; 3],
        radius_cells: u32,
        #[serde(default)]
        velocity: [FT; 3],
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub seed: u64,
    pub emitters: Vec<SceneEmitter>,
}

impl SceneConfig {
    pub fn load(path: &Path) -> Result<SceneConfig, LoadError> {
        let content = read_file(path)?;
        serde_yaml::from_str(&content).map_err(|source| LoadError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Runs all emitters in order. Returns the number of particle slots written by the last one.
    pub fn apply(&self, particle_system: &mut ParticleSystem) -> usize {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut written = 0;
        for emitter in &self.emitters {
            written = match *emitter {
                SceneEmitter::Grid { spacing, jitter } => particle_system.reset_grid(spacing, jitter, &mut rng),
                SceneEmitter::Sphere {
                    center,
                    radius_cells,
                    velocity,
                } => particle_system.add_sphere(center.into(), radius_cells, velocity.into(), &mut rng),
            };
            log::info!("{:?} emitted {} particles", emitter, written);
        }
        written
    }
}

/// Smallest `s` with `s³ >= n`.
fn lattice_side(n: usize) -> usize {
    let mut s = 0;
    while s * s * s < n {
        s += 1;
    }
    s
}

fn jittered(rng: &mut impl Rng, jitter: FT) -> V3 {
    let mut offset = || rng.gen_range::<FT, _>(-1.0..=1.0) * jitter;
    vec3f(offset(), offset(), offset())
}

/// Positions (`w = 1`) and zero velocities of the first `n` sites of a cube lattice with
/// `ceil(cbrt(n))` sites per side. Site `i = x + (y + z s) s` sits at `-1 + r + spacing (x, y, z)`.
pub fn grid_block(n: usize, particle_radius: FT, spacing: FT, jitter: FT, rng: &mut impl Rng) -> (Vec<V4>, Vec<V4>) {
    let s = lattice_side(n);
    let mut positions = Vec::with_capacity(n);
    let mut velocities = Vec::with_capacity(n);

    'lattice: for z in 0..s {
        for y in 0..s {
            for x in 0..s {
                if positions.len() == n {
                    break 'lattice;
                }
                let site = vec3f(x as FT, y as FT, z as FT) * spacing + V3::repeat(particle_radius - 1.);
                positions.push(with_w(site + jittered(rng, jitter), 1.));
                velocities.push(vec4f(0., 0., 0., 0.));
            }
        }
    }

    (positions, velocities)
}

/// Lattice points within `spacing * radius_cells` of `center`, at most `max_particles` of them.
pub fn sphere_block(
    center: V3,
    radius_cells: u32,
    velocity: V3,
    spacing: FT,
    jitter: FT,
    max_particles: usize,
    rng: &mut impl Rng,
) -> (Vec<V4>, Vec<V4>) {
    let r = radius_cells as i32;
    let max_dist = spacing * radius_cells as FT;
    let mut positions = Vec::new();
    let mut velocities = Vec::new();

    for z in -r..=r {
        for y in -r..=r {
            for x in -r..=r {
                let d = vec3f(x as FT, y as FT, z as FT) * spacing;
                if d.norm() <= max_dist && positions.len() < max_particles {
                    positions.push(with_w(center + d + jittered(rng, jitter), 1.));
                    velocities.push(with_w(velocity, 0.));
                }
            }
        }
    }

    (positions, velocities)
}

#[test]
fn lattice_side_is_integer_cube_root() {
    assert_eq!(lattice_side(0), 0);
    assert_eq!(lattice_side(1), 1);
    assert_eq!(lattice_side(8), 2);
    assert_eq!(lattice_side(9), 3);
    assert_eq!(lattice_side(27), 3);
    assert_eq!(lattice_side(16384), 26);
}

#[test]
fn grid_block_fills_lattice_in_slot_order() {
    let mut rng = StdRng::seed_from_u64(0);
    let r = 1. / 64.;
    let (positions, velocities) = grid_block(10, r, 2. * r, 0., &mut rng);
    assert_eq!(positions.len(), 10);
    assert_eq!(velocities.len(), 10);

    // side 3: slot 4 is (1, 1, 0), slot 9 is (0, 0, 1)
    let corner = -1. + r;
    assert!((positions[4] - vec4f(corner + 2. * r, corner + 2. * r, corner, 1.)).norm() < 1.0e-6);
    assert!((positions[9] - vec4f(corner, corner, corner + 2. * r, 1.)).norm() < 1.0e-6);
    assert!(velocities.iter().all(|v| *v == V4::zeros()));
}

#[test]
fn grid_jitter_is_bounded_and_seeded() {
    let r = 1. / 64.;
    let jitter = 0.01 * r;
    let (a, _) = grid_block(64, r, 2. * r, jitter, &mut StdRng::seed_from_u64(3));
    let (b, _) = grid_block(64, r, 2. * r, jitter, &mut StdRng::seed_from_u64(3));
    let (exact, _) = grid_block(64, r, 2. * r, 0., &mut StdRng::seed_from_u64(3));
    assert_eq!(a, b);
    for (p, q) in a.iter().zip(exact.iter()) {
        assert!((p - q).amax() <= jitter * 1.001);
    }
}

#[test]
fn sphere_block_is_a_lattice_ball() {
    let mut rng = StdRng::seed_from_u64(0);
    let spacing = 1. / 32.;
    let center = vec3f(0.1, 0.2, 0.3);
    let (positions, velocities) = sphere_block(center, 1, vec3f(0., -1., 0.), spacing, 0., usize::MAX, &mut rng);
    // center plus the six face neighbors
    assert_eq!(positions.len(), 7);
    assert!(velocities.iter().all(|v| *v == vec4f(0., -1., 0., 0.)));

    let (positions, _) = sphere_block(center, 4, V3::zeros(), spacing, 0., 20, &mut rng);
    assert_eq!(positions.len(), 20);
}

#[test]
fn scene_config_parses_emitters() {
    let yaml = "seed: 5\nemitters:\n  - Grid: {}\n  - Sphere:\n      center: [0.0, 0.5, 0.0]\n      radius_cells: 3\n";
    let scene: SceneConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(scene.seed, 5);
    assert!(matches!(
        scene.emitters[0],
        SceneEmitter::Grid {
            spacing: None,
            jitter: None
        }
    ));
    assert!(matches!(scene.emitters[1], SceneEmitter::Sphere { radius_cells: 3, velocity, .. } if velocity == [0.; 3]));
}
