pub mod collide;
pub mod color_map;
pub mod concurrency;
pub mod grid;
pub mod hash_count;
pub mod integrate;
pub mod invariants;
pub mod pipeline;
pub mod prefix_sum;
pub mod scatter;
pub mod scene;
pub mod simulation_parameters;
pub mod statistics;
pub mod thread_safe_ptr;
pub mod simulation;

pub type IT = i32;

#[cfg(feature = "double-precision")]
pub mod floating_type_mod {
    pub type FT = f64;
}

#[cfg(not(feature = "double-precision"))]
pub mod floating_type_mod {
    pub type FT = f32;
}

use floating_type_mod::FT;

use nalgebra::SVector;

pub type V<FT, const D: usize> = SVector<FT, D>;

pub type VI<const D: usize> = V<IT, D>;

pub type V3 = V<FT, 3>;

/// Position and velocity records carry a fourth lane (`w`) that the renderer consumes.
pub type V4 = V<FT, 4>;

pub fn vec3f(x: FT, y: FT, z: FT) -> V<FT, 3> {
    [x, y, z].into()
}

pub fn vec4f(x: FT, y: FT, z: FT, w: FT) -> V<FT, 4> {
    [x, y, z, w].into()
}

/// Extends a 3d vector with the given `w` lane.
pub fn with_w(v: V3, w: FT) -> V4 {
    vec4f(v.x, v.y, v.z, w)
}

pub use simulation::*;
