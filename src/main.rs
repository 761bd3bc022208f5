//! Circuit optimizer CLI.
//!
//! Loads run parameters from a key=value file (CLI flags override),
//! dispatches the chosen optimization mode, prints a summary of the best
//! circuit and writes the CSV/DOT/JSON reports.

use clap::Parser;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use circuit_search::circuit::{Circuit, CircuitParams};
use circuit_search::config::{self, Mode, Parameters};
use circuit_search::constants::solver;
use circuit_search::fitness::Evaluator;
use circuit_search::genetic::{self, GaStats};
use circuit_search::report;
use circuit_search::validator;

#[derive(Parser, Debug)]
#[command(name = "circuit-search")]
#[command(about = "Genetic optimization of mineral separation circuits")]
struct Args {
    /// Path to the key=value parameter file
    #[arg(short = 'p', long, default_value = "parameters.txt")]
    parameters: PathBuf,

    /// Optimization mode: d (discrete), c (continuous) or h (hybrid);
    /// overrides the file
    #[arg(short, long)]
    mode: Option<String>,

    /// RNG seed; negative uses system entropy; overrides the file
    #[arg(short, long)]
    seed: Option<i64>,

    /// Number of separation units; overrides the file
    #[arg(short = 'n', long)]
    units: Option<usize>,

    /// Generation cap; overrides the file
    #[arg(short = 'g', long)]
    generations: Option<usize>,

    /// Population size; overrides the file
    #[arg(long)]
    population: Option<usize>,

    /// Directory for CSV/DOT/JSON outputs
    #[arg(short, long, default_value = "results")]
    output_dir: PathBuf,

    /// Per-generation progress output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut params = config::load_parameters(&args.parameters);
    if let Some(mode) = &args.mode {
        match Mode::parse(mode) {
            Some(mode) => params.mode = mode,
            None => {
                eprintln!("invalid mode '{mode}' (expected d, c or h)");
                return ExitCode::FAILURE;
            }
        }
    }
    if let Some(seed) = args.seed {
        params.random_seed = seed;
    }
    if let Some(units) = args.units {
        params.num_units = units;
    }
    if let Some(generations) = args.generations {
        params.max_iterations = generations;
    }
    if let Some(population) = args.population {
        params.population_size = population;
    }
    if args.verbose {
        params.verbose = true;
    }

    if params.num_units == 0 {
        eprintln!("num_units must be positive");
        return ExitCode::FAILURE;
    }
    if params.population_size == 0 {
        eprintln!("population_size must be positive");
        return ExitCode::FAILURE;
    }
    if params.max_iterations == 0 {
        eprintln!("max_iterations must be positive");
        return ExitCode::FAILURE;
    }

    let n = params.num_units;
    println!("=== Separation Circuit Optimizer ===");
    println!();
    println!("Mode: {}  units: {n}  population: {}  generations: {}",
        params.mode, params.population_size, params.max_iterations);
    if params.random_seed >= 0 {
        println!("Using fixed seed: {}", params.random_seed);
    }
    println!();

    let circuit_params = CircuitParams::default();
    let evaluator = Evaluator::new(circuit_params.clone());

    let mut genome = vec![0usize; 2 * n + 1];
    let mut beta = vec![0.5; n];
    let volumes_optimized = params.mode != Mode::Discrete;

    let stats = match params.mode {
        Mode::Discrete => {
            info!("running discrete optimization");
            genetic::optimize_discrete(
                &mut genome,
                |g| evaluator.score_discrete(g),
                |g| validator::validate(n, g, &circuit_params).is_valid(),
                &params,
            )
        }
        Mode::Continuous => {
            // Volumes are tuned on a fixed known-valid wiring.
            let Some(template) = genetic::default_templates(n)
                .into_iter()
                .find(|t| validator::validate(n, t, &circuit_params).is_valid())
            else {
                eprintln!("no valid baseline circuit exists for {n} units");
                return ExitCode::FAILURE;
            };
            genome.copy_from_slice(&template);
            info!("running continuous optimization on a fixed wiring");
            let fixed = genome.clone();
            genetic::optimize_continuous(
                &mut beta,
                |b| evaluator.score(&fixed, Some(b)),
                |b| validator::validate_with_volumes(n, &fixed, b, &circuit_params).is_valid(),
                &params,
            )
        }
        Mode::Hybrid => {
            info!("running hybrid optimization (connections + volumes)");
            genetic::optimize_hybrid(
                &mut genome,
                &mut beta,
                |g, b| evaluator.score(g, Some(b)),
                |g, b| {
                    validator::validate_with_volumes(n, g, b, &circuit_params).is_valid()
                },
                &params,
            )
        }
    };

    if stats.generations == 0 {
        eprintln!("optimization could not start; see the log for details");
        return ExitCode::FAILURE;
    }

    // Re-solve the winning circuit for the detailed summary.
    let applied_beta = volumes_optimized.then_some(beta.as_slice());
    let mut circuit = match Circuit::from_genome(&genome, applied_beta, &circuit_params) {
        Ok(circuit) => circuit,
        Err(reason) => {
            eprintln!("optimizer returned an undecodable genome: {reason}");
            return ExitCode::FAILURE;
        }
    };
    if !circuit
        .solve(solver::DEFAULT_TOLERANCE, solver::DEFAULT_MAX_ITERATIONS)
        .is_converged()
    {
        eprintln!("optimizer returned a non-convergent circuit");
        return ExitCode::FAILURE;
    }

    print_summary(&params, &stats, &genome, &beta, volumes_optimized, &circuit);
    write_reports(&args.output_dir, &params, &stats, &genome, applied_beta, &circuit);

    ExitCode::SUCCESS
}

fn print_summary(
    params: &Parameters,
    stats: &GaStats,
    genome: &[usize],
    beta: &[f64],
    volumes_optimized: bool,
    circuit: &Circuit,
) {
    let n = circuit.n();

    println!();
    println!("Optimization complete!");
    println!(
        "Best circuit value: £{:.2} per second ({} generations, {:.2}s{})",
        stats.best_fitness,
        stats.generations,
        stats.elapsed_seconds,
        if stats.converged { ", stalled early" } else { "" },
    );
    println!();

    let genome_str = genome.iter().map(|g| g.to_string()).collect::<Vec<_>>().join(" ");
    println!("Optimized circuit vector: {genome_str}");
    if volumes_optimized {
        let beta_str = beta.iter().map(|b| format!("{b:.5}")).collect::<Vec<_>>().join(" ");
        println!("Optimized volume parameters: {beta_str}");
    }

    println!();
    println!("Circuit performance:");
    println!("- A recovery: {:.2}%", circuit.a_recovery() * 100.0);
    println!("- A grade:    {:.2}%", circuit.a_grade() * 100.0);
    println!("- B recovery: {:.2}%", circuit.b_recovery() * 100.0);
    println!("- B grade:    {:.2}%", circuit.b_grade() * 100.0);

    // How the wiring uses the three sinks.
    let mut direct_to_a = 0;
    let mut direct_to_b = 0;
    let mut direct_to_tailings = 0;
    let mut recycles = 0;
    for (i, unit) in circuit.units().iter().enumerate() {
        for dst in [unit.conc_dst, unit.tail_dst] {
            if dst == n {
                direct_to_a += 1;
            } else if dst == n + 1 {
                direct_to_b += 1;
            } else if dst == n + 2 {
                direct_to_tailings += 1;
            } else if dst < i {
                recycles += 1;
            }
        }
    }
    println!();
    println!("Circuit configuration:");
    println!("- Outlets to A product: {direct_to_a}");
    println!("- Outlets to B product: {direct_to_b}");
    println!("- Outlets to tailings:  {direct_to_tailings}");
    println!("- Recycle connections:  {recycles}");

    println!();
    println!("Unit volumes (m³):");
    for (i, unit) in circuit.units().iter().enumerate() {
        println!("- Unit {i}: {:.2}", unit.volume);
    }
    println!("- Total: {:.2}", circuit.total_volume());

    println!();
    println!("Economic analysis:");
    println!(
        "- A product revenue: £{:.2}/s",
        circuit.stream_revenue(circuit.product_a(), true)
    );
    println!(
        "- B product revenue: £{:.2}/s",
        circuit.stream_revenue(circuit.product_b(), false)
    );
    println!("- Operating cost:    £{:.2}/s", circuit.operating_cost());
    println!("- Net value:         £{:.2}/s", circuit.economic_value());

    if params.verbose {
        println!();
        println!(
            "Population at exit: average fitness {:.2}, stddev {:.2}",
            stats.average_fitness, stats.stddev
        );
    }
}

fn write_reports(
    output_dir: &Path,
    params: &Parameters,
    stats: &GaStats,
    genome: &[usize],
    beta: Option<&[f64]>,
    circuit: &Circuit,
) {
    if let Err(err) = std::fs::create_dir_all(output_dir) {
        error!("could not create {}: {err}; skipping reports", output_dir.display());
        return;
    }

    let csv_path = output_dir.join("circuit_results.csv");
    match report::write_output_info(&csv_path, genome, circuit) {
        Ok(()) => println!("\nSaved circuit data to {}", csv_path.display()),
        Err(err) => error!("could not write {}: {err}", csv_path.display()),
    }

    let dot_path = output_dir.join("circuit.dot");
    match report::export_dot(&dot_path, circuit) {
        Ok(()) => println!("Saved circuit graph to {}", dot_path.display()),
        Err(err) => error!("could not write {}: {err}", dot_path.display()),
    }

    match report::save_best_snapshot(output_dir, genome, beta, stats) {
        Ok(path) => println!("Saved best genome to {}", path.display()),
        Err(err) => error!("could not save the best-genome snapshot: {err}"),
    }

    if params.log_results {
        let log_path = Path::new(&params.log_file);
        if let Err(err) = append_run_log(log_path, params, stats) {
            error!("could not append to {}: {err}", log_path.display());
        }
    }
}

fn append_run_log(path: &Path, params: &Parameters, stats: &GaStats) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "{},{},{},{},{:.6},{:.3}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        params.mode,
        params.num_units,
        stats.generations,
        stats.best_fitness,
        stats.elapsed_seconds,
    )
}
