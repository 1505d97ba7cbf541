use clap::{Parser, Subcommand};
use pcb_common::db::core::BoardDB;
use pcb_common::db::parser::board;
use pcb_common::util::config::Config;
use pcb_common::util::{check, generator, logger, visualization};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Route every net and fill zones.
    Route {
        /// Board file; defaults to `input.board_file`.
        #[arg(long)]
        board: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write the routing outcome as TOML.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Routability reports without routing.
    Analyze {
        #[arg(long)]
        board: Option<PathBuf>,
        /// Nets to analyze; all multi-pad nets when omitted.
        #[arg(long = "net")]
        nets: Vec<String>,
    },
    /// Clearance and connectivity check of a routed board.
    Check {
        #[arg(long)]
        board: Option<PathBuf>,
    },
    Generate {
        #[arg(long, default_value_t = 20)]
        components: usize,
        #[arg(long, default_value_t = 40)]
        nets: usize,
        #[arg(long, default_value_t = 2)]
        layers: usize,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value = "inputs/random.toml")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    logger::init();
    let args = Args::parse();

    let config: Config = if args.config.exists() {
        log::info!("Loading configuration from {:?}", args.config);
        let config_str = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?
    } else {
        log::warn!(
            "Configuration file {:?} not found. Using internal defaults.",
            args.config
        );
        Config::default()
    };

    let command = args.command.unwrap_or(Commands::Route {
        board: None,
        output: None,
        report: None,
    });

    match command {
        Commands::Generate {
            components,
            nets,
            layers,
            seed,
            output,
        } => {
            prepare_output_dir(&output)?;
            log::info!(
                "Generating random board (Components: {}, Nets: {}, Layers: {})...",
                components,
                nets,
                layers
            );
            generator::generate_random_board(&output, components, nets, layers.max(1), seed)?;
            log::info!("Generated: {:?}", output);
        }
        Commands::Route {
            board,
            output,
            report,
        } => {
            let board_path = board.unwrap_or_else(|| PathBuf::from(&config.input.board_file));
            let output = output.unwrap_or_else(|| PathBuf::from(&config.input.output_file));
            let mut db = load_board(&board_path)?;
            let outcome = run_routing(&mut db, &config, &output)?;
            if let Some(path) = report {
                prepare_output_dir(&path)?;
                let text = toml::to_string_pretty(&outcome)
                    .map_err(|e| anyhow::anyhow!("Failed to serialize report: {}", e))?;
                std::fs::write(&path, text)?;
                log::info!("Wrote routing report to {:?}", path);
            }
        }
        Commands::Analyze { board, nets } => {
            let board_path = board.unwrap_or_else(|| PathBuf::from(&config.input.board_file));
            let db = load_board(&board_path)?;
            let ids = nets
                .iter()
                .map(|n| db.net_id(n))
                .collect::<Result<Vec<_>, _>>()?;
            for r in pcb_router::diagnose(&db, &config, &ids)? {
                log::info!(
                    "{}: distance {:.3}, {} obstacles, {} congestion zones{}",
                    r.name,
                    r.distance,
                    r.blocking.len(),
                    r.congestion.len(),
                    if r.has_bottleneck() { " (bottleneck)" } else { "" }
                );
                for o in &r.blocking {
                    log::info!("  blocked by {:?} at {:?} on layer {}", o.kind, o.at, o.layer);
                }
                for a in &r.alternatives {
                    log::info!(
                        "  {:?}: {} ({})",
                        a.kind,
                        if a.feasible { "feasible" } else { "infeasible" },
                        a.reason
                    );
                }
            }
        }
        Commands::Check { board } => {
            let board_path = board.unwrap_or_else(|| PathBuf::from(&config.input.output_file));
            let db = load_board(&board_path)?;
            let report = check::run(&db, config.design_rules.clearance, CHECK_TOLERANCE);
            if !report.is_clean() {
                log::error!(
                    "Verification failed: {} clearance violations, {} open nets",
                    report.violations.len(),
                    report.opens.len()
                );
                std::process::exit(1);
            }
            log::info!("Verification passed.");
        }
    }

    Ok(())
}

/// Slack for grid rounding in the clearance check.
const CHECK_TOLERANCE: f64 = 1e-6;

fn prepare_output_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() && !parent.as_os_str().is_empty() {
            log::info!("Creating output directory: {:?}", parent);
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn load_board(path: &Path) -> anyhow::Result<BoardDB> {
    if !path.exists() {
        return Err(anyhow::anyhow!("Board file missing: {:?}", path));
    }
    log::info!("Parsing board: {:?}", path);
    board::parse(path).map_err(|e| anyhow::anyhow!("Invalid board file {:?}: {}", path, e))
}

fn run_routing(
    db: &mut BoardDB,
    config: &Config,
    output: &Path,
) -> anyhow::Result<pcb_router::outcome::RoutingOutcome> {
    log::info!("Starting Routing...");
    let outcome = pcb_router::route(db, config)?;

    for f in &outcome.failures {
        log::warn!("{} ({:?}): {}", f.name, f.kind, f.reason);
    }
    for p in outcome.pairs.iter().filter(|p| !p.within_tolerance) {
        log::warn!("Pair {} skew {:.3}", p.name, p.skew);
    }

    let image = PathBuf::from(&config.input.image_file);
    prepare_output_dir(&image)?;
    log::info!("Generating routed visualization...");
    visualization::draw_routed_board(db, &image, 2000)?;

    let report = check::run(db, config.design_rules.clearance, CHECK_TOLERANCE);
    if !report.violations.is_empty() {
        log::error!("{} clearance violations in routed copper", report.violations.len());
    }

    prepare_output_dir(output)?;
    log::info!("Writing routed board to {:?}", output);
    board::write(db, output)?;
    Ok(outcome)
}
