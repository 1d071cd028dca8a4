use std::{path::Path, time::Duration};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

use crate::{
    floating_type_mod::FT,
    scene::SceneConfig,
    simulation_parameters::{LoadError, SimulationParams},
    ParticleSystem,
};

const CARGO_PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

const DEFAULT_FRAMES: &str = "1000";
const DEFAULT_DT: &str = "0.5";

pub fn start() {
    let matches = App::new("Hash-Grid Particle Simulation")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run simulation with given config")
                .arg(
                    Arg::with_name("SIMULATION_CONFIG")
                        .help("Sets the simulation paramaters")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("SCENE_CONFIG")
                        .help("Scene setup")
                        .required(true)
                        .index(2),
                )
                .arg(
                    Arg::with_name("FRAMES")
                        .long("frames")
                        .short("n")
                        .takes_value(true)
                        .default_value(DEFAULT_FRAMES)
                        .help("Number of frames to simulate"),
                )
                .arg(
                    Arg::with_name("DT")
                        .long("dt")
                        .takes_value(true)
                        .default_value(DEFAULT_DT)
                        .help("Time step of a single frame"),
                )
                .arg(
                    Arg::with_name("OVERWRITE_CONFIG_FILE")
                        .long("overwrite-config-file")
                        .short("c")
                        .required(false)
                        .takes_value(true)
                        .help("Overwrite config"),
                )
                .arg(
                    Arg::with_name("STATISTICS_ENABLED")
                        .help("Track performance of individual stages")
                        .short("p")
                        .long("statistics-enabled")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("STATISTICS_PATH")
                        .long("statistics-path")
                        .short("w")
                        .required(false)
                        .takes_value(true)
                        .help("Where to write statistics to"),
                ),
        )
        .get_matches();

    init_logging(matches.occurrences_of("v"));

    if let Some(run_matches) = matches.subcommand_matches("run") {
        if let Err(e) = run(run_matches) {
            log::error!("{}", e);
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                log::error!("  caused by: {}", cause);
                source = cause.source();
            }
            std::process::exit(1);
        }
    } else {
        unreachable!()
    }
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    // RUST_LOG takes precedence over the flags
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("invalid value '{value}' for {name}")]
    InvalidArgument { name: &'static str, value: String },
    #[error("failed writing statistics to {path}")]
    WriteStatistics {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &'static str) -> Result<Option<T>, RunError> {
    matches
        .value_of(name)
        .map(|value| {
            value.parse::<T>().map_err(|_| RunError::InvalidArgument {
                name,
                value: value.to_string(),
            })
        })
        .transpose()
}

fn average_msec(total_duration: Duration, num_frames: u64) -> f64 {
    total_duration.as_secs_f64() * 1000. / num_frames.max(1) as f64
}

fn run(run_matches: &ArgMatches) -> Result<(), RunError> {
    let parameter_file = Path::new(run_matches.value_of("SIMULATION_CONFIG").unwrap_or_default());
    let overwrite_file = run_matches.value_of("OVERWRITE_CONFIG_FILE").map(Path::new);
    let simulation_params = SimulationParams::load(parameter_file, overwrite_file)?;
    log::info!("{:?}", simulation_params);

    let scene_file = Path::new(run_matches.value_of("SCENE_CONFIG").unwrap_or_default());
    let scene_config = SceneConfig::load(scene_file)?;
    log::info!("{:?}", scene_config);

    let num_frames: u64 = parse_arg(run_matches, "FRAMES")?.unwrap_or(0);
    let dt: FT = parse_arg(run_matches, "DT")?.unwrap_or(0.);
    let counters_enabled = run_matches.is_present("STATISTICS_ENABLED");
    let statistics_path_opt = run_matches.value_of("STATISTICS_PATH");

    let mut particle_system =
        ParticleSystem::new(simulation_params, counters_enabled).map_err(LoadError::from)?;
    scene_config.apply(&mut particle_system);

    let mut total_duration = Duration::from_nanos(0);
    for frame_number in 0..num_frames {
        let a = std::time::Instant::now();
        particle_system.update(dt);
        let b = std::time::Instant::now();
        total_duration += b - a;

        log::debug!(
            "{:05}: {}msec ({}msec AVG)",
            frame_number,
            (b - a).as_secs_f32() * 1000.,
            average_msec(total_duration, frame_number + 1)
        );
    }

    println!(
        "{} frames of {} particles ({:?}) in {:.1}ms, kinetic energy {}, {} look-back fallbacks in the last frame",
        num_frames,
        particle_system.num_particles(),
        particle_system.simulation_params().scan_strategy,
        total_duration.as_secs_f64() * 1000.,
        particle_system.kinetic_energy(),
        particle_system.scan_state().fallbacks()
    );

    if counters_enabled {
        let s = particle_system.write_statistics();
        print!("{}", s);
        if let Some(statistics_path) = statistics_path_opt {
            std::fs::write(statistics_path, s).map_err(|source| RunError::WriteStatistics {
                path: statistics_path.to_string(),
                source,
            })?;
        }
    }

    Ok(())
}

#[test]
fn average_frame_time_handles_any_frame_count() {
    let total = Duration::from_millis(300);
    assert!((average_msec(total, 3) - 100.).abs() < 1.0e-9);
    assert!((average_msec(total, 0) - 300.).abs() < 1.0e-9);
    let huge = u32::MAX as u64 + 1;
    assert!((average_msec(total, huge) - 300. / huge as f64).abs() < 1.0e-12);
}
