//! Fitness evaluation for candidate circuits.
//!
//! The evaluator bridges the optimizer's flat genomes and the circuit
//! model: decode, solve to steady state, price the product streams. Any
//! failure along the way collapses to a large negative penalty so the
//! optimizer can rank invalid candidates without special-casing them.

use crate::circuit::{Circuit, CircuitParams, SolveResult};
use crate::constants::solver;

/// Score assigned to genomes that cannot be decoded or do not converge.
pub const DEFAULT_PENALTY: f64 = -1e12;

/// Scores genomes against a fixed parameter set.
///
/// Scoring is referentially transparent: the same `(genome, beta)` pair
/// always produces the same score, and no state survives a call.
#[derive(Clone, Debug)]
pub struct Evaluator {
    params: CircuitParams,
    tolerance: f64,
    max_iterations: usize,
    penalty: f64,
}

impl Evaluator {
    pub fn new(params: CircuitParams) -> Self {
        Evaluator {
            params,
            tolerance: solver::DEFAULT_TOLERANCE,
            max_iterations: solver::DEFAULT_MAX_ITERATIONS,
            penalty: DEFAULT_PENALTY,
        }
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn params(&self) -> &CircuitParams {
        &self.params
    }

    /// Score a discrete genome with default cell volumes.
    pub fn score_discrete(&self, genome: &[usize]) -> f64 {
        self.score(genome, None)
    }

    /// Score a genome, optionally with per-unit volume parameters.
    pub fn score(&self, genome: &[usize], beta: Option<&[f64]>) -> f64 {
        let mut circuit = match Circuit::from_genome(genome, beta, &self.params) {
            Ok(circuit) => circuit,
            Err(_) => return self.penalty,
        };
        match circuit.solve(self.tolerance, self.max_iterations) {
            SolveResult::Converged(_) => circuit.economic_value(),
            SolveResult::Diverged => self.penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_genomes_score_the_penalty() {
        let evaluator = Evaluator::new(CircuitParams::default());

        // Wrong length, self-referential feed slot, out-of-range outlet.
        assert_eq!(evaluator.score_discrete(&[0, 1]), DEFAULT_PENALTY);
        assert_eq!(evaluator.score_discrete(&[1, 1, 3]), DEFAULT_PENALTY);
        assert_eq!(evaluator.score_discrete(&[0, 9, 3]), DEFAULT_PENALTY);
    }

    #[test]
    fn penalty_is_configurable() {
        let evaluator = Evaluator::new(CircuitParams::default()).with_penalty(-1e6);
        assert_eq!(evaluator.score_discrete(&[0, 1]), -1e6);
    }

    #[test]
    fn valid_circuit_scores_its_economic_value() {
        let evaluator = Evaluator::new(CircuitParams::default());
        let score = evaluator.score_discrete(&[0, 1, 3]);

        assert!(score.is_finite());
        assert!(score > DEFAULT_PENALTY);

        let mut circuit = Circuit::from_genome(&[0, 1, 3], None, evaluator.params()).unwrap();
        assert!(circuit
            .solve(solver::DEFAULT_TOLERANCE, solver::DEFAULT_MAX_ITERATIONS)
            .is_converged());
        assert!((score - circuit.economic_value()).abs() < 1e-9);
    }

    #[test]
    fn scoring_is_reproducible() {
        let evaluator = Evaluator::new(CircuitParams::default());
        let genome = [0, 2, 1, 3, 4];
        let beta = [0.25, 0.75];

        let first = evaluator.score(&genome, Some(&beta));
        for _ in 0..5 {
            let again = evaluator.score(&genome, Some(&beta));
            assert!((again - first).abs() < 1e-9);
        }
    }

    #[test]
    fn beta_changes_the_score() {
        let evaluator = Evaluator::new(CircuitParams::default());
        let genome = [0, 2, 1, 3, 4];

        let small = evaluator.score(&genome, Some(&[0.0, 0.0]));
        let large = evaluator.score(&genome, Some(&[1.0, 1.0]));
        assert!((small - large).abs() > 1e-9);
    }
}
