use crate::{concurrency::par_iter_mut2, floating_type_mod::FT, simulation_parameters::SimulationParams, with_w, V3, V4};

#[cfg(test)]
use crate::{vec3f, vec4f};

/// Advances every particle by gravity and global damping, then reflects it off the
/// `[-1 + r, 1 - r]` box. Positions get `w = 1`, velocities `w = 0`.
pub fn integrate(simulation_params: &SimulationParams, dt: FT, position: &mut [V4], velocity: &mut [V4]) {
    let n = usize::min(simulation_params.num_particles as usize, position.len());
    par_iter_mut2(&mut position[..n], &mut velocity[..n], |_i, p_position, p_velocity| {
        let (pos, vel) = integrate_particle(simulation_params, dt, p_position.xyz(), p_velocity.xyz());
        *p_position = with_w(pos, 1.);
        *p_velocity = with_w(vel, 0.);
    });
}

pub fn integrate_particle(simulation_params: &SimulationParams, dt: FT, mut pos: V3, mut vel: V3) -> (V3, V3) {
    vel += simulation_params.gravity * dt;
    vel *= simulation_params.global_damping;

    pos += vel * dt;

    let limit = 1. - simulation_params.particle_radius;
    for d in 0..3 {
        if pos[d] > limit {
            pos[d] = limit;
            vel[d] *= simulation_params.boundary_damping;
        }
        if pos[d] < -limit {
            pos[d] = -limit;
            vel[d] *= simulation_params.boundary_damping;
        }
    }

    (pos, vel)
}

#[cfg(test)]
fn zero_gravity_params() -> SimulationParams {
    let mut params = SimulationParams::default();
    params.gravity = vec3f(0., 0., 0.);
    params
}

#[test]
fn boundary_bounce_clamps_and_reflects() {
    let params = zero_gravity_params();
    let r = params.particle_radius;
    let eps = 1.0e-4;

    let (pos, vel) = integrate_particle(&params, 0.01, vec3f(1. - r + eps, 0., 0.), vec3f(0.5, 0., 0.));
    assert_eq!(pos.x, 1. - r);
    assert_eq!(vel.x, 0.5 * params.boundary_damping);
    assert!(vel.x < 0.);

    let (pos, vel) = integrate_particle(&params, 0.01, vec3f(0., -1. + r - eps, 0.), vec3f(0., -0.5, 0.));
    assert_eq!(pos.y, -1. + r);
    assert_eq!(vel.y, -0.5 * params.boundary_damping);
}

#[test]
fn resting_particles_stay_put_without_gravity() {
    let params = zero_gravity_params();
    let mut position = vec![at_rest(0.25, -0.5, 0.75), at_rest(-0.1, 0.2, 0.3)];
    let mut velocity = vec![V4::zeros(); 2];
    let before = position.clone();

    for _ in 0..10 {
        integrate(&params, 0.016, &mut position, &mut velocity);
    }
    assert_eq!(position, before);
    assert!(velocity.iter().all(|v| *v == V4::zeros()));
}

#[test]
fn gravity_accelerates_downwards() {
    let params = SimulationParams::default();
    let (pos, vel) = integrate_particle(&params, 1., vec3f(0., 0., 0.), vec3f(0., 0., 0.));
    assert_eq!(vel, params.gravity);
    assert_eq!(pos, params.gravity);
}

#[test]
fn indices_beyond_particle_count_are_untouched() {
    let mut params = SimulationParams::default();
    params.num_particles = 1;
    let mut position = vec![at_rest(0., 0., 0.), at_rest(0., 0., 0.)];
    let mut velocity = vec![V4::zeros(); 2];
    integrate(&params, 1., &mut position, &mut velocity);
    assert!(position[0].y < 0.);
    assert_eq!(position[1].y, 0.);
}

#[cfg(test)]
fn at_rest(x: FT, y: FT, z: FT) -> V4 {
    vec4f(x, y, z, 1.)
}
