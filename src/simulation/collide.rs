use crate::{
    concurrency::par_iter_mut0,
    grid::{iterate_grid_neighbors, UniformGrid},
    prefix_sum::CountSource,
    scatter::SortedParticles,
    simulation_parameters::SimulationParams,
    thread_safe_ptr::ThreadSafeMutSlice,
    with_w, V3, V4,
};

#[cfg(test)]
use crate::floating_type_mod::FT;

/// Contact force on sphere A from sphere B: a spring pushing the centers apart, plus
/// damping along the relative velocity and a shear term along its tangential part.
/// Zero when the spheres do not overlap.
pub fn collide_spheres(simulation_params: &SimulationParams, pos_a: V3, pos_b: V3, vel_a: V3, vel_b: V3) -> V3 {
    let rel_pos = pos_b - pos_a;
    let dist = rel_pos.norm();
    let collide_dist = 2. * simulation_params.particle_radius;

    // coincident centers have no contact normal
    if dist >= collide_dist || dist <= 0. {
        return V3::zeros();
    }

    let norm = rel_pos / dist;
    let rel_vel = vel_b - vel_a;
    let tan_vel = rel_vel - rel_vel.dot(&norm) * norm;

    let mut force = -simulation_params.spring * (collide_dist - dist) * norm;
    force += simulation_params.damping * rel_vel;
    force += simulation_params.shear * tan_vel;
    force
}

/// Reads the cell-sorted particles, sums the contact forces from the 27 surrounding cells and
/// writes `velocity + force` back to the particle's canonical slot.
///
/// `cell_start`/`cell_count` describe the range `[start, start + count)` of every cell in the
/// sorted arrays.
pub fn collide<S: CountSource + ?Sized>(
    simulation_params: &SimulationParams,
    grid: &UniformGrid,
    sorted: &SortedParticles,
    cell_start: &[u32],
    cell_count: &S,
    velocity: &mut [V4],
) {
    let n = sorted.len().min(velocity.len());
    let velocity = ThreadSafeMutSlice::new(velocity);

    par_iter_mut0(n, |idx| {
        let pos = sorted.position[idx].xyz();
        let vel = sorted.velocity[idx].xyz();
        let cell_pos = grid.cell_pos(pos);

        let mut force = V3::zeros();
        iterate_grid_neighbors(|offset| {
            let hash = grid.cell_hash(cell_pos + offset) as usize;
            let start = cell_start[hash] as usize;
            let end = start + cell_count.get(hash) as usize;
            force += collide_cell(simulation_params, sorted, start..end, idx, pos, vel);
        });

        let original_index = sorted.original_index[idx] as usize;
        // SAFETY: sorted slots map one-to-one onto canonical indices
        unsafe { velocity.write(original_index, with_w(vel + force, 0.)) };
    });
}

fn collide_cell(
    simulation_params: &SimulationParams,
    sorted: &SortedParticles,
    range: std::ops::Range<usize>,
    idx: usize,
    pos: V3,
    vel: V3,
) -> V3 {
    let mut force = V3::zeros();
    for j in range {
        if j != idx {
            force += collide_spheres(
                simulation_params,
                pos,
                sorted.position[j].xyz(),
                vel,
                sorted.velocity[j].xyz(),
            );
        }
    }
    force
}

/// Direct O(n²) evaluation of the contact forces, indexed by canonical particle.
pub fn contact_forces_brute_force(simulation_params: &SimulationParams, position: &[V4], velocity: &[V4]) -> Vec<V3> {
    (0..position.len())
        .map(|i| {
            (0..position.len())
                .filter(|&j| j != i)
                .map(|j| {
                    collide_spheres(
                        simulation_params,
                        position[i].xyz(),
                        position[j].xyz(),
                        velocity[i].xyz(),
                        velocity[j].xyz(),
                    )
                })
                .fold(V3::zeros(), |acc, f| acc + f)
        })
        .collect()
}

#[cfg(test)]
fn overlap_distance(simulation_params: &SimulationParams) -> FT {
    simulation_params.particle_radius * 1.2
}

#[test]
fn spring_term_is_antisymmetric() {
    use crate::vec3f;

    let params = SimulationParams::default();
    let a = vec3f(0.1, 0.2, 0.3);
    let b = a + vec3f(1., 2., -1.).normalize() * overlap_distance(&params);

    let f_ab = collide_spheres(&params, a, b, V3::zeros(), V3::zeros());
    let f_ba = collide_spheres(&params, b, a, V3::zeros(), V3::zeros());

    assert!(f_ab.norm() > 0.);
    assert!((f_ab + f_ba).norm() < 1.0e-6);
    // repulsive: the force on A points away from B
    assert!(f_ab.dot(&(b - a)) < 0.);
}

#[test]
fn separated_or_coincident_spheres_feel_nothing() {
    use crate::vec3f;

    let params = SimulationParams::default();
    let a = vec3f(0., 0., 0.);
    let far = vec3f(2. * params.particle_radius, 0., 0.);
    let vel = vec3f(1., 1., 1.);
    assert_eq!(collide_spheres(&params, a, far, vel, -vel), V3::zeros());
    assert_eq!(collide_spheres(&params, a, a, vel, -vel), V3::zeros());
}

#[test]
fn damping_and_shear_follow_relative_velocity() {
    use crate::vec3f;

    let mut params = SimulationParams::default();
    params.spring = 0.;
    params.shear = 0.;
    let a = vec3f(0., 0., 0.);
    let b = vec3f(overlap_distance(&params), 0., 0.);
    let f = collide_spheres(&params, a, b, V3::zeros(), vec3f(1., 0., 0.));
    assert!((f - vec3f(params.damping, 0., 0.)).norm() < 1.0e-6);

    params.damping = 0.;
    params.shear = 0.1;
    // a purely normal relative velocity has no tangential part
    let f = collide_spheres(&params, a, b, V3::zeros(), vec3f(1., 0., 0.));
    assert!(f.norm() < 1.0e-6);
    let f = collide_spheres(&params, a, b, V3::zeros(), vec3f(0., 1., 0.));
    assert!((f - vec3f(0., 0.1, 0.)).norm() < 1.0e-6);
}
