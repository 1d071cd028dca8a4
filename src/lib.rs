/*!
Particle collision simulation on a uniform hash grid.

Every frame integrates the particles, counting-sorts them by grid cell (atomic per-cell counts,
a parallel exclusive scan and a scatter) and resolves sphere contacts between neighboring cells.
*/

mod platform;
mod simulation;

pub use simulation::*;

/// Avoids 'unused' warnings.
#[cfg(not(target_arch = "wasm32"))]
pub use platform::start;
