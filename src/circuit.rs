//! The separation circuit: an arena of cells wired by plain indices.
//!
//! Destinations live in the extended node space `[0, n + 3)`. The three
//! virtual sinks `n`, `n + 1` and `n + 2` are the A-product, B-product
//! and tailings outputs; they are accumulators, not cells. The circuit is
//! decoded from a flat genome, solved to steady state by successive
//! substitution, and priced by [`Circuit::economic_value`].

use crate::constants::{circuit, economic, feed, physical, solver, test};
use crate::unit::{Flow, Unit};
use crate::validator::InvalidReason;

/// Revenue coefficients (£/kg) per species per product stream plus the
/// volume cost curve. Waste coefficients are negative penalties.
#[derive(Clone, Debug)]
pub struct EconomicParams {
    pub a_value_in_a_stream: f64,
    pub b_value_in_a_stream: f64,
    pub waste_penalty_in_a_stream: f64,

    pub b_value_in_b_stream: f64,
    pub a_value_in_b_stream: f64,
    pub waste_penalty_in_b_stream: f64,

    pub cost_coefficient: f64,
    pub volume_penalty_coefficient: f64,
    pub max_circuit_volume: f64,
}

impl Default for EconomicParams {
    fn default() -> Self {
        EconomicParams {
            a_value_in_a_stream: economic::A_VALUE_IN_A_STREAM,
            b_value_in_a_stream: economic::B_VALUE_IN_A_STREAM,
            waste_penalty_in_a_stream: economic::WASTE_PENALTY_IN_A_STREAM,
            b_value_in_b_stream: economic::B_VALUE_IN_B_STREAM,
            a_value_in_b_stream: economic::A_VALUE_IN_B_STREAM,
            waste_penalty_in_b_stream: economic::WASTE_PENALTY_IN_B_STREAM,
            cost_coefficient: economic::COST_COEFFICIENT,
            volume_penalty_coefficient: economic::VOLUME_PENALTY_COEFFICIENT,
            max_circuit_volume: circuit::MAX_CIRCUIT_VOLUME,
        }
    }
}

/// Everything a circuit needs besides its wiring: external feed, material
/// properties, kinetics, cell geometry limits and economics.
#[derive(Clone, Debug)]
pub struct CircuitParams {
    pub feed: Flow,
    pub density: f64,
    pub solids_fraction: f64,

    pub k_a: f64,
    pub k_b: f64,
    pub k_waste: f64,

    pub default_volume: f64,
    pub min_volume: f64,
    pub max_volume: f64,

    pub economics: EconomicParams,
}

impl Default for CircuitParams {
    fn default() -> Self {
        CircuitParams {
            feed: Flow::new(feed::A_RATE, feed::B_RATE, feed::WASTE_RATE),
            density: physical::MATERIAL_DENSITY,
            solids_fraction: physical::SOLIDS_FRACTION,
            k_a: physical::K_A,
            k_b: physical::K_B,
            k_waste: physical::K_WASTE,
            default_volume: circuit::DEFAULT_UNIT_VOLUME,
            min_volume: circuit::MIN_UNIT_VOLUME,
            max_volume: circuit::MAX_UNIT_VOLUME,
            economics: EconomicParams::default(),
        }
    }
}

impl CircuitParams {
    /// Symmetric bundle: equal feeds, equal product values, no waste
    /// penalty, smaller default cells.
    pub fn test() -> Self {
        CircuitParams {
            feed: Flow::new(test::A_FEED_RATE, test::B_FEED_RATE, test::WASTE_FEED_RATE),
            default_volume: test::DEFAULT_UNIT_VOLUME,
            economics: EconomicParams {
                a_value_in_a_stream: test::A_VALUE_IN_A_STREAM,
                b_value_in_a_stream: 0.0,
                waste_penalty_in_a_stream: 0.0,
                b_value_in_b_stream: test::B_VALUE_IN_B_STREAM,
                a_value_in_b_stream: 0.0,
                waste_penalty_in_b_stream: 0.0,
                ..EconomicParams::default()
            },
            ..CircuitParams::default()
        }
    }
}

/// Outcome of a mass-balance run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveResult {
    /// Steady state reached; carries the number of iterations performed.
    Converged(usize),
    /// Iteration cap hit before the relative change fell below tolerance.
    Diverged,
}

impl SolveResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolveResult::Converged(_))
    }
}

/// A decoded circuit ready to be solved.
#[derive(Clone, Debug)]
pub struct Circuit {
    units: Vec<Unit>,
    feed_unit: usize,
    params: CircuitParams,

    product_a: Flow,
    product_b: Flow,
    tailings: Flow,
}

impl Circuit {
    /// Decode a circuit from a flat genome, optionally applying per-unit
    /// volume parameters.
    ///
    /// The genome holds `2n + 1` entries: the feed unit followed by one
    /// `(concentrate, tailings)` destination pair per unit. Destinations
    /// `n`, `n + 1` and `n + 2` are the A-product, B-product and tailings
    /// sinks. Only shape and index-range errors are rejected here; the
    /// full structural rules live in the validator.
    pub fn from_genome(
        genome: &[usize],
        beta: Option<&[f64]>,
        params: &CircuitParams,
    ) -> Result<Circuit, InvalidReason> {
        if genome.is_empty() || genome.len() % 2 == 0 {
            return Err(InvalidReason::LengthMismatch {
                expected: genome.len() | 1,
                actual: genome.len(),
            });
        }
        let n = (genome.len() - 1) / 2;

        let feed_unit = genome[0];
        if feed_unit >= n {
            return Err(InvalidReason::FeedOutOfRange(feed_unit));
        }

        let mut units = Vec::with_capacity(n);
        for i in 0..n {
            let conc_dst = genome[1 + 2 * i];
            let tail_dst = genome[2 + 2 * i];
            for dst in [conc_dst, tail_dst] {
                if dst > n + 2 {
                    return Err(InvalidReason::OutletOutOfRange { unit: i, dst });
                }
            }
            units.push(Unit::new(conc_dst, tail_dst, params));
        }

        if let Some(beta) = beta {
            if beta.len() != n {
                return Err(InvalidReason::VolumeLengthMismatch {
                    expected: n,
                    actual: beta.len(),
                });
            }
            for (unit, &b) in units.iter_mut().zip(beta) {
                unit.set_volume(b);
            }
        }

        let mut circuit = Circuit {
            units,
            feed_unit,
            params: params.clone(),
            product_a: Flow::ZERO,
            product_b: Flow::ZERO,
            tailings: Flow::ZERO,
        };
        circuit.reset_inlets();
        Ok(circuit)
    }

    pub fn n(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn feed_unit(&self) -> usize {
        self.feed_unit
    }

    pub fn params(&self) -> &CircuitParams {
        &self.params
    }

    pub fn product_a(&self) -> Flow {
        self.product_a
    }

    pub fn product_b(&self) -> Flow {
        self.product_b
    }

    pub fn tailings(&self) -> Flow {
        self.tailings
    }

    fn reset_inlets(&mut self) {
        for unit in &mut self.units {
            unit.feed = Flow::ZERO;
        }
        self.units[self.feed_unit].feed = self.params.feed;
    }

    /// Iterate the circuit to steady state by successive substitution.
    ///
    /// Each iteration processes every cell from its current inlet, then
    /// routes the outlet streams: the first stream reaching a destination
    /// in an iteration overwrites that inlet, later streams add to it.
    /// The external feed is re-applied to the feed unit before routing
    /// and the feed unit is pre-marked rewritten, so recycle streams
    /// arriving there accumulate on top of the external feed. Convergence
    /// is judged on the maximum relative inlet change across all cells
    /// and species.
    ///
    /// The inlet state is kept across calls: re-solving an already
    /// converged circuit confirms in a single iteration.
    pub fn solve(&mut self, tolerance: f64, max_iterations: usize) -> SolveResult {
        let n = self.units.len();
        let mut prev = vec![Flow::ZERO; n];
        let mut rewritten = vec![false; n];

        for iter in 0..max_iterations {
            for (i, unit) in self.units.iter().enumerate() {
                prev[i] = unit.feed;
            }

            let density = self.params.density;
            let solids_fraction = self.params.solids_fraction;
            for unit in &mut self.units {
                unit.process(density, solids_fraction);
            }

            self.product_a = Flow::ZERO;
            self.product_b = Flow::ZERO;
            self.tailings = Flow::ZERO;
            rewritten.fill(false);

            self.units[self.feed_unit].feed = self.params.feed;
            rewritten[self.feed_unit] = true;

            for i in 0..n {
                let (conc, conc_dst, tail, tail_dst) = {
                    let u = &self.units[i];
                    (u.conc, u.conc_dst, u.tail, u.tail_dst)
                };
                self.route(conc, conc_dst, &mut rewritten);
                self.route(tail, tail_dst, &mut rewritten);
            }

            let mut max_rel_change = 0.0f64;
            for (unit, last) in self.units.iter().zip(&prev) {
                for (now, before) in [
                    (unit.feed.a, last.a),
                    (unit.feed.b, last.b),
                    (unit.feed.waste, last.waste),
                ] {
                    let rel = (now - before).abs() / before.max(solver::REL_CHANGE_FLOOR);
                    max_rel_change = max_rel_change.max(rel);
                }
            }

            if max_rel_change < tolerance {
                return SolveResult::Converged(iter + 1);
            }
        }
        SolveResult::Diverged
    }

    fn route(&mut self, stream: Flow, dst: usize, rewritten: &mut [bool]) {
        let n = self.units.len();
        if dst == n {
            self.product_a += stream;
        } else if dst == n + 1 {
            self.product_b += stream;
        } else if dst == n + 2 {
            self.tailings += stream;
        } else {
            if !rewritten[dst] {
                rewritten[dst] = true;
                self.units[dst].feed = Flow::ZERO;
            }
            self.units[dst].feed += stream;
        }
    }

    pub fn total_volume(&self) -> f64 {
        self.units.iter().map(|u| u.volume).sum()
    }

    /// Operating cost: `c·V^(2/3)` plus a quadratic penalty past the
    /// total-volume cap.
    pub fn operating_cost(&self) -> f64 {
        let e = &self.params.economics;
        let total = self.total_volume();
        let mut cost = e.cost_coefficient * total.powf(2.0 / 3.0);
        if total > e.max_circuit_volume {
            cost += e.volume_penalty_coefficient * (total - e.max_circuit_volume).powi(2);
        }
        cost
    }

    /// Gross value of one product stream under the coefficient record.
    pub fn stream_revenue(&self, stream: Flow, is_a_product: bool) -> f64 {
        let e = &self.params.economics;
        if is_a_product {
            stream.a * e.a_value_in_a_stream
                + stream.b * e.b_value_in_a_stream
                + stream.waste * e.waste_penalty_in_a_stream
        } else {
            stream.b * e.b_value_in_b_stream
                + stream.a * e.a_value_in_b_stream
                + stream.waste * e.waste_penalty_in_b_stream
        }
    }

    /// Net economic value: product revenue minus operating cost.
    pub fn economic_value(&self) -> f64 {
        self.stream_revenue(self.product_a, true) + self.stream_revenue(self.product_b, false)
            - self.operating_cost()
    }

    /// Fraction of the A feed recovered into the A product.
    pub fn a_recovery(&self) -> f64 {
        if self.params.feed.a < solver::REL_CHANGE_FLOOR {
            return 0.0;
        }
        self.product_a.a / self.params.feed.a
    }

    /// Fraction of the B feed recovered into the B product.
    pub fn b_recovery(&self) -> f64 {
        if self.params.feed.b < solver::REL_CHANGE_FLOOR {
            return 0.0;
        }
        self.product_b.b / self.params.feed.b
    }

    /// Share of species A in the A product stream.
    pub fn a_grade(&self) -> f64 {
        let total = self.product_a.total();
        if total > 0.0 {
            self.product_a.a / total
        } else {
            0.0
        }
    }

    /// Share of species B in the B product stream.
    pub fn b_grade(&self) -> f64 {
        let total = self.product_b.total();
        if total > 0.0 {
            self.product_b.b / total
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::solver;

    fn solve_default(genome: &[usize]) -> (Circuit, SolveResult) {
        let params = CircuitParams::default();
        let mut circuit = Circuit::from_genome(genome, None, &params).unwrap();
        let result = circuit.solve(solver::DEFAULT_TOLERANCE, solver::DEFAULT_MAX_ITERATIONS);
        (circuit, result)
    }

    #[test]
    fn rejects_even_and_empty_genomes() {
        let params = CircuitParams::default();
        assert!(Circuit::from_genome(&[], None, &params).is_err());
        assert!(Circuit::from_genome(&[0, 1], None, &params).is_err());
    }

    #[test]
    fn rejects_feed_pointing_at_a_terminal() {
        let params = CircuitParams::default();
        let err = Circuit::from_genome(&[1, 1, 3], None, &params).unwrap_err();
        assert!(matches!(err, InvalidReason::FeedOutOfRange(1)));
    }

    #[test]
    fn rejects_out_of_range_outlet() {
        let params = CircuitParams::default();
        let err = Circuit::from_genome(&[0, 4, 3], None, &params).unwrap_err();
        assert!(matches!(err, InvalidReason::OutletOutOfRange { unit: 0, dst: 4 }));
    }

    #[test]
    fn rejects_beta_length_mismatch() {
        let params = CircuitParams::default();
        let err = Circuit::from_genome(&[0, 1, 3], Some(&[0.5, 0.5]), &params).unwrap_err();
        assert!(matches!(
            err,
            InvalidReason::VolumeLengthMismatch { expected: 1, actual: 2 }
        ));
    }

    #[test]
    fn beta_scales_unit_volumes() {
        let params = CircuitParams::default();
        let circuit = Circuit::from_genome(&[0, 1, 3], Some(&[0.0]), &params).unwrap();
        assert!((circuit.units()[0].volume - params.min_volume).abs() < 1e-12);

        let circuit = Circuit::from_genome(&[0, 1, 3], Some(&[1.0]), &params).unwrap();
        assert!((circuit.units()[0].volume - params.max_volume).abs() < 1e-12);
    }

    #[test]
    fn single_unit_circuit_converges_immediately() {
        // Feed into unit 0, concentrate to A product, tailings out.
        let (circuit, result) = solve_default(&[0, 1, 3]);

        match result {
            SolveResult::Converged(iters) => assert!(iters <= 2),
            SolveResult::Diverged => panic!("single-unit circuit must converge"),
        }

        let feed = circuit.params().feed;
        let out = circuit.product_a() + circuit.product_b() + circuit.tailings();
        assert!((out.a - feed.a).abs() < 1e-9);
        assert!((out.b - feed.b).abs() < 1e-9);
        assert!((out.waste - feed.waste).abs() < 1e-9);

        // Everything leaves through the two wired sinks.
        assert_eq!(circuit.product_b(), Flow::ZERO);
        assert!(circuit.product_a().a > 0.0);
        assert!(circuit.tailings().a > 0.0);
    }

    #[test]
    fn recycle_circuit_conserves_mass_at_steady_state() {
        // u0: conc -> A product, tail -> u1; u1: conc -> B product, tail -> tailings.
        let (circuit, result) = solve_default(&[0, 2, 1, 3, 4]);
        assert!(result.is_converged());

        let feed = circuit.params().feed;
        let out = circuit.product_a() + circuit.product_b() + circuit.tailings();
        let tol = 2.0 * solver::DEFAULT_TOLERANCE * feed.total();
        assert!((out.a - feed.a).abs() < tol);
        assert!((out.b - feed.b).abs() < tol);
        assert!((out.waste - feed.waste).abs() < tol);
    }

    #[test]
    fn recycle_into_feed_unit_conserves_mass() {
        // u1 tails back into the feed unit: the external feed and the
        // recycle stream must both reach unit 0.
        let (circuit, result) = solve_default(&[0, 1, 3, 2, 0]);
        assert!(result.is_converged());

        let feed = circuit.params().feed;
        let out = circuit.product_a() + circuit.product_b() + circuit.tailings();
        let tol = 2.0 * 2.0 * solver::DEFAULT_TOLERANCE * feed.total();
        assert!((out.a - feed.a).abs() < tol);
        assert!((out.b - feed.b).abs() < tol);
        assert!((out.waste - feed.waste).abs() < tol);

        // The feed unit inlet is the external feed plus the recycle.
        assert!(circuit.units()[0].feed.total() > feed.total());
    }

    #[test]
    fn solve_is_idempotent_once_converged() {
        let params = CircuitParams::default();
        let mut circuit = Circuit::from_genome(&[0, 2, 1, 3, 4], None, &params).unwrap();
        assert!(circuit
            .solve(solver::DEFAULT_TOLERANCE, solver::DEFAULT_MAX_ITERATIONS)
            .is_converged());

        match circuit.solve(solver::DEFAULT_TOLERANCE, solver::DEFAULT_MAX_ITERATIONS) {
            SolveResult::Converged(iters) => assert_eq!(iters, 1),
            SolveResult::Diverged => panic!("re-solve of a converged circuit diverged"),
        }
    }

    #[test]
    fn iteration_cap_reports_diverged() {
        let params = CircuitParams::default();
        let mut circuit = Circuit::from_genome(&[0, 1, 3, 2, 0], None, &params).unwrap();
        assert_eq!(circuit.solve(solver::DEFAULT_TOLERANCE, 1), SolveResult::Diverged);
    }

    #[test]
    fn economic_value_matches_hand_computation() {
        let (circuit, result) = solve_default(&[0, 1, 3]);
        assert!(result.is_converged());

        let e = &circuit.params().economics;
        let pa = circuit.product_a();
        let expected_revenue = pa.a * e.a_value_in_a_stream
            + pa.b * e.b_value_in_a_stream
            + pa.waste * e.waste_penalty_in_a_stream;
        let expected_cost = e.cost_coefficient * circuit.total_volume().powf(2.0 / 3.0);

        assert!((circuit.economic_value() - (expected_revenue - expected_cost)).abs() < 1e-9);
    }

    #[test]
    fn volume_penalty_applies_past_the_cap() {
        let params = CircuitParams::default();

        // 10 units at 20 m³ exceed the 150 m³ cap by 50.
        let genome = [0, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 12];
        let beta = vec![1.0; 10];
        let circuit = Circuit::from_genome(&genome, Some(&beta), &params).unwrap();

        let total = circuit.total_volume();
        assert!((total - 200.0).abs() < 1e-9);
        let base = params.economics.cost_coefficient * total.powf(2.0 / 3.0);
        let penalty = params.economics.volume_penalty_coefficient * (total - 150.0).powi(2);
        assert!((circuit.operating_cost() - (base + penalty)).abs() < 1e-6);
    }

    #[test]
    fn recovery_and_grade_follow_product_flows() {
        let (circuit, result) = solve_default(&[0, 1, 3]);
        assert!(result.is_converged());

        let feed = circuit.params().feed;
        let pa = circuit.product_a();
        assert!((circuit.a_recovery() - pa.a / feed.a).abs() < 1e-12);
        assert!((circuit.a_grade() - pa.a / pa.total()).abs() < 1e-12);
        assert_eq!(circuit.b_recovery(), 0.0);
        assert_eq!(circuit.b_grade(), 0.0);
    }

    #[test]
    fn test_params_select_symmetric_bundle() {
        let params = CircuitParams::test();
        assert_eq!(params.feed, Flow::new(10.0, 10.0, 10.0));
        assert!((params.default_volume - 5.0).abs() < 1e-12);
        assert_eq!(params.economics.waste_penalty_in_a_stream, 0.0);
        assert_eq!(params.economics.a_value_in_a_stream, 100.0);
    }
}
