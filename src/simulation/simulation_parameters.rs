use std::{collections::HashMap, path::Path};

use crate::{floating_type_mod::FT, vec3f, V3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ScanStrategy {
    /// Single pass: every workgroup resolves its carry-in by walking back over the
    /// published states of its logical predecessors.
    DecoupledLookBack,

    /// Scan blocks, scan the block totals recursively, then add the block offsets back.
    /// Never busy-waits.
    ReduceThenScan,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimulationParams {
    pub num_particles: u32,
    pub grid_size: [u32; 3],

    // cell size is twice this radius
    pub particle_radius: FT,

    pub gravity: V3,
    pub global_damping: FT,
    // negative: velocity is reflected and scaled when hitting the domain boundary
    pub boundary_damping: FT,

    // collision response
    pub spring: FT,
    pub damping: FT,
    pub shear: FT,

    /// Invocations per workgroup. The scanner processes two elements per invocation.
    pub workgroup_size: u32,
    pub scan_strategy: ScanStrategy,

    /// Number of polls on an unpublished predecessor before a workgroup gives up on the
    /// look-back and recomputes its carry-in from the input counts.
    pub look_back_spin_limit: u32,

    pub check_invariants: bool,
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            num_particles: 16384,
            grid_size: [64, 64, 64],
            particle_radius: 1. / 64.,
            gravity: vec3f(0., -0.0003, 0.),
            global_damping: 1.,
            boundary_damping: -0.5,
            spring: 0.5,
            damping: 0.02,
            shear: 0.1,
            workgroup_size: 64,
            scan_strategy: ScanStrategy::DecoupledLookBack,
            look_back_spin_limit: 1 << 20,
            check_invariants: false,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("grid dimension {axis} has {cells} cells, at least 3 are needed for distinct neighbor cells")]
    GridTooSmall { axis: usize, cells: u32 },
    #[error("grid of {0:?} cells does not fit into 32-bit cell hashes")]
    GridTooLarge([u32; 3]),
    #[error("particle radius must be positive (got {0})")]
    InvalidRadius(FT),
    #[error("workgroup size must be a non-zero power of two (got {0})")]
    InvalidWorkgroupSize(u32),
    #[error("look-back spin limit must be at least one poll")]
    InvalidSpinLimit,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed reading {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("overwrite config sets unknown attribute '{0}'")]
    UnknownAttribute(String),
    #[error("simulation config is not a mapping")]
    NotAMapping,
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl SimulationParams {
    pub fn num_cells(&self) -> usize {
        self.grid_size.iter().map(|&x| x as usize).product()
    }

    pub fn cell_size(&self) -> FT {
        2. * self.particle_radius
    }

    /// Elements covered by one scanner workgroup.
    pub fn scan_block_len(&self) -> usize {
        2 * self.workgroup_size as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, &n) in self.grid_size.iter().enumerate() {
            if n < 3 {
                return Err(ConfigError::GridTooSmall { axis, cells: n });
            }
        }

        let num_cells = self
            .grid_size
            .iter()
            .try_fold(1u64, |acc, &n| acc.checked_mul(n as u64))
            .filter(|&n| n <= u32::MAX as u64);
        if num_cells.is_none() {
            return Err(ConfigError::GridTooLarge(self.grid_size));
        }

        if !(self.particle_radius > 0.) {
            return Err(ConfigError::InvalidRadius(self.particle_radius));
        }

        if !self.workgroup_size.is_power_of_two() {
            return Err(ConfigError::InvalidWorkgroupSize(self.workgroup_size));
        }

        if self.look_back_spin_limit == 0 {
            return Err(ConfigError::InvalidSpinLimit);
        }

        Ok(())
    }

    /// Parses simulation parameters from YAML. Every key of the optional overwrite
    /// file replaces the corresponding key of the base file; unknown keys are rejected.
    pub fn from_yaml(base: &str, overwrite: Option<&str>) -> Result<SimulationParams, LoadError> {
        let mut params_serde: serde_yaml::Value = serde_yaml::from_str(base).map_err(|source| LoadError::Parse {
            path: "simulation config".into(),
            source,
        })?;

        if let Some(overwrite) = overwrite {
            let overwrite_config: HashMap<String, serde_yaml::Value> =
                serde_yaml::from_str(overwrite).map_err(|source| LoadError::Parse {
                    path: "overwrite config".into(),
                    source,
                })?;
            let mapping = params_serde.as_mapping_mut().ok_or(LoadError::NotAMapping)?;
            for (k, v) in overwrite_config.into_iter() {
                match mapping.get_mut(&serde_yaml::Value::String(k.clone())) {
                    Some(slot) => *slot = v,
                    None => return Err(LoadError::UnknownAttribute(k)),
                }
            }
        }

        let params: SimulationParams = serde_yaml::from_value(params_serde).map_err(|source| LoadError::Parse {
            path: "simulation config".into(),
            source,
        })?;
        params.validate()?;
        Ok(params)
    }

    pub fn load(path: &Path, overwrite_path: Option<&Path>) -> Result<SimulationParams, LoadError> {
        let base = read_file(path)?;
        let overwrite = overwrite_path.map(read_file).transpose()?;
        Self::from_yaml(&base, overwrite.as_deref())
    }
}

pub(crate) fn read_file(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[test]
fn default_params_are_valid() {
    let params = SimulationParams::default();
    assert_eq!(params.validate(), Ok(()));
    assert_eq!(params.num_cells(), 64 * 64 * 64);
    assert_eq!(params.scan_block_len(), 128);
}

#[test]
fn rejects_bad_workgroup_size() {
    let mut params = SimulationParams::default();
    params.workgroup_size = 48;
    assert_eq!(params.validate(), Err(ConfigError::InvalidWorkgroupSize(48)));
    params.workgroup_size = 0;
    assert_eq!(params.validate(), Err(ConfigError::InvalidWorkgroupSize(0)));
}

#[test]
fn rejects_oversized_grid() {
    let mut params = SimulationParams::default();
    params.grid_size = [4096, 4096, 4096];
    assert_eq!(params.validate(), Err(ConfigError::GridTooLarge([4096, 4096, 4096])));
    params.grid_size = [8, 2, 8];
    assert_eq!(params.validate(), Err(ConfigError::GridTooSmall { axis: 1, cells: 2 }));
}

#[test]
fn overwrite_config_replaces_keys() {
    let base = serde_yaml::to_string(&SimulationParams::default()).unwrap();
    let params = SimulationParams::from_yaml(&base, Some("num_particles: 10\nscan_strategy: ReduceThenScan\n")).unwrap();
    assert_eq!(params.num_particles, 10);
    assert_eq!(params.scan_strategy, ScanStrategy::ReduceThenScan);

    let err = SimulationParams::from_yaml(&base, Some("no_such_key: 1\n")).unwrap_err();
    assert!(matches!(err, LoadError::UnknownAttribute(k) if k == "no_such_key"));
}
