//! Physical, economic and solver constants shared across the crate.
//!
//! Two constant bundles exist for the circuit defaults: the plant-scale
//! values in [`circuit`] / [`feed`] / [`economic`], and the symmetric
//! values in [`test`] used by the test-mode parameter set. They are kept
//! separate on purpose; `CircuitParams::test()` selects the latter.

/// Material properties and separation kinetics.
pub mod physical {
    /// Density of all solid material (kg/m³).
    pub const MATERIAL_DENSITY: f64 = 3000.0;

    /// Fraction of cell volume occupied by solids.
    pub const SOLIDS_FRACTION: f64 = 0.1;

    /// First-order rate constant routing valuable A to concentrate (s⁻¹).
    pub const K_A: f64 = 0.008;

    /// First-order rate constant routing valuable B to concentrate (s⁻¹).
    pub const K_B: f64 = 0.004;

    /// First-order rate constant routing waste to concentrate (s⁻¹).
    pub const K_WASTE: f64 = 0.0005;
}

/// External feed entering the circuit (kg/s).
pub mod feed {
    pub const A_RATE: f64 = 8.0;
    pub const B_RATE: f64 = 12.0;
    pub const WASTE_RATE: f64 = 80.0;
}

/// Revenue coefficients and cost-curve parameters (£/kg and £).
///
/// The cross-stream coefficients (B paying out in the A stream and vice
/// versa) default to zero; configuration may override them.
pub mod economic {
    pub const A_VALUE_IN_A_STREAM: f64 = 120.0;
    pub const B_VALUE_IN_A_STREAM: f64 = 0.0;
    pub const WASTE_PENALTY_IN_A_STREAM: f64 = -300.0;

    pub const B_VALUE_IN_B_STREAM: f64 = 80.0;
    pub const A_VALUE_IN_B_STREAM: f64 = 0.0;
    pub const WASTE_PENALTY_IN_B_STREAM: f64 = -25.0;

    /// Operating cost scales with total volume to the 2/3 power.
    pub const COST_COEFFICIENT: f64 = 5.0;

    /// Quadratic penalty applied past the total-volume cap.
    pub const VOLUME_PENALTY_COEFFICIENT: f64 = 1000.0;
}

/// Cell geometry limits.
pub mod circuit {
    /// Volume of a cell when no continuous parameter is supplied (m³).
    pub const DEFAULT_UNIT_VOLUME: f64 = 10.0;

    pub const MIN_UNIT_VOLUME: f64 = 2.5;
    pub const MAX_UNIT_VOLUME: f64 = 20.0;

    /// Total circuit volume above which the quadratic penalty kicks in (m³).
    pub const MAX_CIRCUIT_VOLUME: f64 = 150.0;

    pub const DEFAULT_NUM_UNITS: usize = 10;
}

/// Mass-balance solver tuning.
pub mod solver {
    pub const DEFAULT_TOLERANCE: f64 = 1e-6;
    pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

    /// Iteration cap when the solver runs as the final validity check.
    pub const VALIDATION_MAX_ITERATIONS: usize = 100;

    /// Floor substituted for the total solids rate in the residence-time
    /// formula so starved cells stay finite.
    pub const MIN_FLOW: f64 = 1e-10;

    /// Floor for the previous-inlet denominator in the convergence metric.
    pub const REL_CHANGE_FLOOR: f64 = 1e-12;
}

/// Symmetric bundle used by the test-mode parameter set.
pub mod test {
    pub const A_FEED_RATE: f64 = 10.0;
    pub const B_FEED_RATE: f64 = 10.0;
    pub const WASTE_FEED_RATE: f64 = 10.0;

    pub const A_VALUE_IN_A_STREAM: f64 = 100.0;
    pub const B_VALUE_IN_B_STREAM: f64 = 100.0;

    pub const DEFAULT_UNIT_VOLUME: f64 = 5.0;
}
