//! Run parameters and the key=value parameter file.
//!
//! The file format is one `key=value` pair per line; `#` starts a
//! comment. Unknown keys and unparseable values produce warnings and
//! leave the corresponding defaults in place, so a partial or sloppy
//! parameter file never aborts a run.

use log::warn;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Which genome representation the optimizer evolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Discrete,
    Continuous,
    Hybrid,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "d" => Some(Mode::Discrete),
            "c" => Some(Mode::Continuous),
            "h" => Some(Mode::Hybrid),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Discrete => "discrete",
            Mode::Continuous => "continuous",
            Mode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// Genetic-algorithm run parameters.
#[derive(Clone, Debug)]
pub struct Parameters {
    /// RNG seed; negative selects system entropy.
    pub random_seed: i64,
    pub num_units: usize,
    pub mode: Mode,

    pub max_iterations: usize,
    pub population_size: usize,
    pub elite_count: usize,
    pub tournament_size: usize,

    pub crossover_probability: f64,
    pub crossover_points: usize,

    pub mutation_probability: f64,
    pub mutation_step_size: f64,
    pub allow_mutation_wrapping: bool,

    pub use_inversion: bool,
    pub inversion_probability: f64,

    pub use_scaling_mutation: bool,
    pub scaling_mutation_prob: f64,
    pub scaling_mutation_min: f64,
    pub scaling_mutation_max: f64,

    /// Fitness delta below which a generation counts as stalled.
    pub convergence_threshold: f64,
    pub stall_generations: usize,

    pub verbose: bool,
    pub log_results: bool,
    pub log_file: String,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            random_seed: -1,
            num_units: crate::constants::circuit::DEFAULT_NUM_UNITS,
            mode: Mode::Hybrid,
            max_iterations: 1000,
            population_size: 100,
            elite_count: 1,
            tournament_size: 2,
            crossover_probability: 0.8,
            crossover_points: 5,
            mutation_probability: 0.01,
            mutation_step_size: 2.0,
            allow_mutation_wrapping: true,
            use_inversion: false,
            inversion_probability: 0.1,
            use_scaling_mutation: false,
            scaling_mutation_prob: 0.1,
            scaling_mutation_min: 0.5,
            scaling_mutation_max: 1.5,
            convergence_threshold: 1e-6,
            stall_generations: 50,
            verbose: false,
            log_results: false,
            log_file: "run_log.csv".to_string(),
        }
    }
}

/// Load parameters from a key=value file, falling back to defaults for
/// anything missing or malformed.
pub fn load_parameters(path: &Path) -> Parameters {
    let mut params = Parameters::default();
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!("could not open {}: {err}; using default parameters", path.display());
            return params;
        }
    };

    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        apply(&mut params, key.trim(), value.trim());
    }
    params
}

fn apply(params: &mut Parameters, key: &str, value: &str) {
    match key {
        "random_seed" => set(key, value, &mut params.random_seed),
        "num_units" => set(key, value, &mut params.num_units),
        "mode" => match Mode::parse(value) {
            Some(mode) => params.mode = mode,
            None => warn!("could not parse '{key}={value}' (expected d, c or h)"),
        },
        "max_iterations" => set(key, value, &mut params.max_iterations),
        "population_size" => set(key, value, &mut params.population_size),
        "elite_count" => set(key, value, &mut params.elite_count),
        "tournament_size" => set(key, value, &mut params.tournament_size),
        "crossover_probability" => set(key, value, &mut params.crossover_probability),
        "crossover_points" => set(key, value, &mut params.crossover_points),
        "mutation_probability" => set(key, value, &mut params.mutation_probability),
        "mutation_step_size" => set(key, value, &mut params.mutation_step_size),
        "allow_mutation_wrapping" => params.allow_mutation_wrapping = parse_bool(value),
        "use_inversion" => params.use_inversion = parse_bool(value),
        "inversion_probability" => set(key, value, &mut params.inversion_probability),
        "use_scaling_mutation" => params.use_scaling_mutation = parse_bool(value),
        "scaling_mutation_prob" => set(key, value, &mut params.scaling_mutation_prob),
        "scaling_mutation_min" => set(key, value, &mut params.scaling_mutation_min),
        "scaling_mutation_max" => set(key, value, &mut params.scaling_mutation_max),
        "convergence_threshold" => set(key, value, &mut params.convergence_threshold),
        "stall_generations" => set(key, value, &mut params.stall_generations),
        "verbose" => params.verbose = parse_bool(value),
        "log_results" => params.log_results = parse_bool(value),
        "log_file" => params.log_file = value.to_string(),
        _ => warn!("unknown parameter '{key}'"),
    }
}

fn set<T: FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("could not parse '{key}={value}'; keeping default"),
    }
}

fn parse_bool(value: &str) -> bool {
    value == "true" || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_from(contents: &str) -> Parameters {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        load_parameters(file.path())
    }

    #[test]
    fn missing_file_returns_defaults() {
        let params = load_parameters(Path::new("/nonexistent/parameters.txt"));
        assert_eq!(params.population_size, Parameters::default().population_size);
        assert_eq!(params.mode, Mode::Hybrid);
    }

    #[test]
    fn values_and_comments_parse() {
        let params = load_from(
            "# run setup\n\
             random_seed = 42\n\
             mode = d  # discrete only\n\
             population_size = 64\n\
             crossover_probability = 0.9\n\
             use_inversion = true\n\
             \n\
             log_file = out.csv\n",
        );

        assert_eq!(params.random_seed, 42);
        assert_eq!(params.mode, Mode::Discrete);
        assert_eq!(params.population_size, 64);
        assert!((params.crossover_probability - 0.9).abs() < 1e-12);
        assert!(params.use_inversion);
        assert_eq!(params.log_file, "out.csv");
    }

    #[test]
    fn bad_values_keep_defaults() {
        let params = load_from(
            "population_size = many\n\
             mode = x\n\
             mutation_probability = 0.2\n\
             some_future_knob = 3\n",
        );

        assert_eq!(params.population_size, Parameters::default().population_size);
        assert_eq!(params.mode, Mode::Hybrid);
        assert!((params.mutation_probability - 0.2).abs() < 1e-12);
    }

    #[test]
    fn bool_values_accept_true_and_one() {
        let params = load_from("verbose = 1\nlog_results = true\nuse_scaling_mutation = no\n");
        assert!(params.verbose);
        assert!(params.log_results);
        assert!(!params.use_scaling_mutation);
    }
}
