use clap::{Parser, Subcommand};
use point_registration::analysis::{rotation_error_degrees, translation_error};
use point_registration::config::{load_config, Config};
use point_registration::data::{load_point_cloud, SyntheticConfig, SyntheticPair};
use point_registration::features::LocalGeometryExtractor;
use point_registration::logging::{init_logging, new_correlation_id};
use point_registration::pipeline::Registrar;
use point_registration::server::{RegistrationServer, ServerState};
use point_registration::types::RegistrationResult;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "register")]
#[command(about = "Rigid point cloud registration with weighted keypoints and RANSAC")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML or JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP registration service
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,
    },

    /// Register two point cloud files
    Align {
        /// Source cloud (JSON list of [x, y, z])
        #[arg(short, long)]
        source: PathBuf,

        /// Target cloud (JSON list of [x, y, z])
        #[arg(short, long)]
        target: PathBuf,

        /// Write the transform response here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Register a synthetic pair with known ground truth
    Demo {
        #[arg(short = 'n', long, default_value = "500")]
        points: usize,

        /// Rotation about z, in degrees
        #[arg(short, long, default_value = "30")]
        angle: f64,

        /// Gaussian noise on target points
        #[arg(long, default_value = "0.0")]
        noise: f64,

        /// Fraction of target points replaced by clutter
        #[arg(long, default_value = "0.0")]
        outliers: f64,

        /// Fraction of correct feature matches
        #[arg(long, default_value = "0.8")]
        correct: f64,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if cli.verbose > 0 {
        let level = match cli.verbose {
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        config.logging.global_level = level.to_string();
        config.logging.sampling_level = level.to_string();
        config.logging.matching_level = level.to_string();
        config.logging.solver_level = level.to_string();
        config.logging.server_level = level.to_string();
    }
    let _guard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Serve { port, host } => handle_serve(config, port, host),
        Commands::Align {
            source,
            target,
            output,
            seed,
        } => handle_align(&config, source, target, output, seed),
        Commands::Demo {
            points,
            angle,
            noise,
            outliers,
            correct,
            seed,
        } => {
            let synthetic = SyntheticConfig {
                points,
                angle_degrees: angle,
                noise_sigma: noise,
                outlier_fraction: outliers,
                correct_match_fraction: correct,
                ..Default::default()
            };
            handle_demo(&config, synthetic, seed)
        }
    }
}

fn handle_serve(mut config: Config, port: Option<u16>, host: Option<String>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    let extractor = Arc::new(LocalGeometryExtractor::new(config.descriptor.clone()));
    let state = ServerState::from_config(&config, extractor)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(RegistrationServer::new(state).run())
}

fn handle_align(
    config: &Config,
    source: PathBuf,
    target: PathBuf,
    output: Option<PathBuf>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let source = load_point_cloud(&source)?;
    let target = load_point_cloud(&target)?;

    let extractor = Arc::new(LocalGeometryExtractor::new(config.descriptor.clone()));
    let registrar = Registrar::new(extractor, config.registration())?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    new_correlation_id();
    let result = registrar.register(&source, &target, &mut rng)?;
    print_summary(&result);

    let response = serde_json::to_string_pretty(&result.to_response())?;
    match output {
        Some(path) => {
            std::fs::write(&path, response)?;
            println!("Transform written to {}", path.display());
        }
        None => println!("{}", response),
    }
    Ok(())
}

fn handle_demo(config: &Config, synthetic: SyntheticConfig, seed: u64) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let pair = SyntheticPair::generate(&synthetic, &mut rng)?;

    println!(
        "Synthetic pair: {} points, {:.1}° rotation, {:.0}% correct matches",
        pair.source.len(),
        pair.transform.rotation_angle_degrees(),
        pair.correct_fraction() * 100.0
    );

    let registrar = Registrar::new(Arc::new(pair.oracle()), config.registration())?;
    new_correlation_id();
    let result = registrar.register(&pair.source, &pair.target, &mut rng)?;
    print_summary(&result);

    if let Some(estimate) = result.transform() {
        println!(
            "Rotation error:    {:.4}°",
            rotation_error_degrees(estimate, &pair.transform)
        );
        println!(
            "Translation error: {:.4}",
            translation_error(estimate, &pair.transform)
        );
    }
    Ok(())
}

fn print_summary(result: &RegistrationResult) {
    match result {
        RegistrationResult::Solved(registration) => {
            println!(
                "Solved: {} / {} inliers (fitness {:.3}, rmse {:.4}) after {} iterations in {:.1} ms",
                registration.inlier_count,
                registration.correspondence_count,
                registration.fitness,
                registration.inlier_rmse,
                registration.stats.iterations,
                registration.stats.elapsed_ms
            );
        }
        RegistrationResult::NoSolution { reason, stats } => {
            println!(
                "No solution: {} after {} iterations",
                reason, stats.iterations
            );
        }
    }
}
