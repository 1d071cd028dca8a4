use crate::{floating_type_mod::FT, simulation_parameters::SimulationParams, vec3f, V3, VI};

/// Uniform grid over the `[-1, 1]³` domain. Cells are addressed toroidally: coordinates
/// outside the grid wrap around instead of being clamped.
#[derive(Debug, Clone, Copy)]
pub struct UniformGrid {
    origin: V3,
    cell_size: FT,
    size: VI<3>,
}

impl UniformGrid {
    pub fn new(simulation_params: &SimulationParams) -> UniformGrid {
        let [x, y, z] = simulation_params.grid_size;
        UniformGrid {
            origin: vec3f(-1., -1., -1.),
            cell_size: simulation_params.cell_size(),
            size: [x as i32, y as i32, z as i32].into(),
        }
    }

    pub fn num_cells(&self) -> usize {
        self.size.fold(1, |acc, x| acc * x as usize)
    }

    pub fn cell_size(&self) -> FT {
        self.cell_size
    }

    pub fn cell_pos(&self, p: V3) -> VI<3> {
        ((p - self.origin) / self.cell_size).map(|x| x.floor() as i32)
    }

    /// Row-major index of the (wrapped) cell: `x + (y + z * size.y) * size.x`.
    pub fn cell_hash(&self, cell_pos: VI<3>) -> u32 {
        let x = cell_pos.x.rem_euclid(self.size.x);
        let y = cell_pos.y.rem_euclid(self.size.y);
        let z = cell_pos.z.rem_euclid(self.size.z);
        (x + (y + z * self.size.y) * self.size.x) as u32
    }

    pub fn hash_position(&self, p: V3) -> u32 {
        self.cell_hash(self.cell_pos(p))
    }
}

/// Calls `f` for all 27 cell offsets of a 3x3x3 neighborhood, the center cell included.
pub fn iterate_grid_neighbors(mut f: impl FnMut(VI<3>)) {
    for z in -1..=1 {
        for y in -1..=1 {
            for x in -1..=1 {
                f([x, y, z].into());
            }
        }
    }
}

#[test]
fn hash_stays_in_range() {
    let mut params = SimulationParams::default();
    params.grid_size = [8, 4, 3];
    let grid = UniformGrid::new(&params);
    assert_eq!(grid.num_cells(), 96);

    for z in -20..20 {
        for y in -20..20 {
            for x in -20..20 {
                let hash = grid.cell_hash([x, y, z].into());
                assert!((hash as usize) < grid.num_cells());
            }
        }
    }
}

#[test]
fn hash_wraps_toroidally() {
    let params = SimulationParams::default();
    let grid = UniformGrid::new(&params);

    assert_eq!(grid.cell_hash([0, 0, 0].into()), 0);
    assert_eq!(grid.cell_hash([1, 0, 0].into()), 1);
    assert_eq!(grid.cell_hash([0, 1, 0].into()), 64);
    assert_eq!(grid.cell_hash([0, 0, 1].into()), 64 * 64);
    assert_eq!(grid.cell_hash([-1, 0, 0].into()), 63);
    assert_eq!(grid.cell_hash([64, 65, -64].into()), grid.cell_hash([0, 1, 0].into()));

    // the domain corner maps to the first cell, positions just below the domain wrap to the last
    assert_eq!(grid.hash_position(vec3f(-1., -1., -1.)), 0);
    assert_eq!(grid.cell_pos(vec3f(-1.01, 0., 0.)).x, -1);
    assert_eq!(grid.hash_position(vec3f(-1.01, -1., -1.)), 63);
}

#[test]
fn neighborhood_has_27_cells() {
    let mut count = 0;
    let mut sum = VI::<3>::zeros();
    iterate_grid_neighbors(|offset| {
        count += 1;
        sum += offset;
    });
    assert_eq!(count, 27);
    assert_eq!(sum, VI::<3>::zeros());
}
