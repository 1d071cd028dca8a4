use std::path::Path;

use hashgrid_particles::{
    scene::SceneConfig,
    simulation_parameters::{LoadError, ScanStrategy, SimulationParams},
    ParticleSystem,
};

fn config_path(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("configs").join(name)
}

#[test]
fn shipped_configs_load() {
    let params = SimulationParams::load(&config_path("simulation.yaml"), None).unwrap();
    assert_eq!(params.num_particles, 16384);
    assert_eq!(params.grid_size, [64, 64, 64]);
    assert_eq!(params.scan_strategy, ScanStrategy::DecoupledLookBack);

    let params = SimulationParams::load(
        &config_path("simulation.yaml"),
        Some(&config_path("reduce-then-scan.yaml")),
    )
    .unwrap();
    assert_eq!(params.scan_strategy, ScanStrategy::ReduceThenScan);
    assert!(params.check_invariants);

    for scene in ["scene-grid.yaml", "scene-sphere-drop.yaml"] {
        SceneConfig::load(&config_path(scene)).unwrap();
    }
}

#[test]
fn sphere_drop_scene_runs() {
    let mut params = SimulationParams::load(&config_path("simulation.yaml"), None).unwrap();
    params.num_particles = 4096;
    params.check_invariants = true;
    let mut particle_system = ParticleSystem::new(params, true).unwrap();

    let scene = SceneConfig::load(&config_path("scene-sphere-drop.yaml")).unwrap();
    let in_sphere = scene.apply(&mut particle_system);
    assert!(in_sphere > 0 && in_sphere < 4096);

    for _ in 0..20 {
        particle_system.update(0.5);
    }
    assert!(particle_system
        .positions()
        .iter()
        .all(|p| p.xyz().iter().all(|c| c.abs() <= 1.)));
    assert!(particle_system.write_statistics().contains("look-back-fallbacks"));
}

#[test]
fn missing_config_reports_path() {
    let err = SimulationParams::load(Path::new("does/not/exist.yaml"), None).unwrap_err();
    match err {
        LoadError::Io { path, .. } => assert_eq!(path, "does/not/exist.yaml"),
        other => panic!("unexpected error {}", other),
    }
}
