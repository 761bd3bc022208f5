//! Report writers: append-only CSVs, DOT graphs and JSON snapshots.
//!
//! All writers are best-effort from the caller's point of view: an I/O
//! failure is returned for logging, never propagated into the
//! optimization result.

use crate::circuit::Circuit;
use crate::genetic::GaStats;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append the discrete genome as one comma-separated row of integers.
pub fn append_vector_csv(path: &Path, genome: &[usize]) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let row = genome
        .iter()
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join(",");
    writeln!(file, "{row}")
}

/// Append one row with each unit's concentrate and tailings totals at
/// convergence, fixed to two decimals.
pub fn append_units_csv(path: &Path, circuit: &Circuit) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let row = circuit
        .units()
        .iter()
        .map(|u| format!("{:.2},{:.2}", u.conc.total(), u.tail.total()))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(file, "{row}")
}

/// Truncate `path` and write the genome row followed by the units row.
pub fn write_output_info(path: &Path, genome: &[usize], circuit: &Circuit) -> io::Result<()> {
    File::create(path)?;
    append_vector_csv(path, genome)?;
    append_units_csv(path, circuit)
}

/// Emit the circuit as a DOT graph: one node per unit, labeled edges for
/// both outlet streams, box-shaped nodes for the three sinks.
pub fn export_dot(path: &Path, circuit: &Circuit) -> io::Result<()> {
    let mut file = File::create(path)?;
    let n = circuit.n();

    let node_name = |dst: usize| -> String {
        if dst == n {
            "product_a".to_string()
        } else if dst == n + 1 {
            "product_b".to_string()
        } else if dst == n + 2 {
            "tailings".to_string()
        } else {
            format!("unit{dst}")
        }
    };

    writeln!(file, "digraph Circuit {{")?;
    for (i, unit) in circuit.units().iter().enumerate() {
        writeln!(file, "  unit{i} [label=\"Unit {i}\"];")?;
        writeln!(file, "  unit{i} -> {} [label=\"conc\"];", node_name(unit.conc_dst))?;
        writeln!(file, "  unit{i} -> {} [label=\"tail\"];", node_name(unit.tail_dst))?;
    }
    writeln!(file, "  product_a [shape=box, label=\"A Product\"];")?;
    writeln!(file, "  product_b [shape=box, label=\"B Product\"];")?;
    writeln!(file, "  tailings [shape=box, label=\"Tailings\"];")?;
    writeln!(file, "}}")
}

#[derive(Serialize)]
struct Snapshot<'a> {
    genome: &'a [usize],
    volume_params: Option<&'a [f64]>,
    best_fitness: f64,
    generations: usize,
    converged: bool,
}

/// Save the best genome to a timestamped, fitness-tagged JSON file and
/// return its path.
pub fn save_best_snapshot(
    dir: &Path,
    genome: &[usize],
    beta: Option<&[f64]>,
    stats: &GaStats,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let snapshot = Snapshot {
        genome,
        volume_params: beta,
        best_fitness: stats.best_fitness,
        generations: stats.generations,
        converged: stats.converged,
    };

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let fitness_tag = format!("{:.4}", stats.best_fitness).replace('.', "_");
    let path = dir.join(format!("best_fit{fitness_tag}_{timestamp}.json"));

    let json = serde_json::to_string_pretty(&snapshot)?;
    let mut file = File::create(&path)?;
    file.write_all(json.as_bytes())?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Circuit, CircuitParams};
    use crate::constants::solver;

    fn solved_circuit(genome: &[usize]) -> Circuit {
        let params = CircuitParams::default();
        let mut circuit = Circuit::from_genome(genome, None, &params).unwrap();
        assert!(circuit
            .solve(solver::DEFAULT_TOLERANCE, solver::DEFAULT_MAX_ITERATIONS)
            .is_converged());
        circuit
    }

    #[test]
    fn vector_csv_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.csv");

        append_vector_csv(&path, &[0, 1, 3]).unwrap();
        append_vector_csv(&path, &[0, 2, 1, 3, 4]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "0,1,3\n0,2,1,3,4\n");
    }

    #[test]
    fn units_csv_has_two_numbers_per_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.csv");
        let circuit = solved_circuit(&[0, 2, 1, 3, 4]);

        append_units_csv(&path, &circuit).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let fields: Vec<&str> = contents.trim().split(',').collect();
        assert_eq!(fields.len(), 2 * circuit.n());
        for field in fields {
            field.parse::<f64>().unwrap();
            assert_eq!(field.split('.').nth(1).map(str::len), Some(2));
        }
    }

    #[test]
    fn output_info_truncates_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let circuit = solved_circuit(&[0, 1, 3]);

        std::fs::write(&path, "stale contents\n").unwrap();
        write_output_info(&path, &[0, 1, 3], &circuit).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("0,1,3\n"));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn dot_export_names_units_and_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("circuit.dot");
        let circuit = solved_circuit(&[0, 2, 1, 3, 4]);

        export_dot(&path, &circuit).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("digraph Circuit {"));
        assert!(contents.contains("unit0 -> product_a [label=\"conc\"];"));
        assert!(contents.contains("unit0 -> unit1 [label=\"tail\"];"));
        assert!(contents.contains("unit1 -> product_b [label=\"conc\"];"));
        assert!(contents.contains("unit1 -> tailings [label=\"tail\"];"));
        assert!(contents.contains("product_a [shape=box"));
        assert!(contents.contains("tailings [shape=box"));
    }

    #[test]
    fn snapshot_round_trips_the_genome() {
        let dir = tempfile::tempdir().unwrap();
        let stats = GaStats {
            best_fitness: 12.5,
            generations: 3,
            converged: true,
            ..GaStats::default()
        };

        let path = save_best_snapshot(dir.path(), &[0, 1, 3], Some(&[0.5]), &stats).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("best_fit12_5000"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["genome"], serde_json::json!([0, 1, 3]));
        assert_eq!(json["best_fitness"], serde_json::json!(12.5));
    }
}
