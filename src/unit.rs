//! A single separation cell.
//!
//! Each cell receives one mixed feed stream and splits it into a
//! concentrate and a tailings stream according to first-order kinetics:
//! the residence time follows from the cell volume and the volumetric
//! throughput, and the per-species recovery to concentrate is
//! `k·τ / (1 + k·τ)`. The tailings stream is the exact complement, so
//! mass is conserved by construction.

use std::ops::{Add, AddAssign};

use crate::circuit::CircuitParams;
use crate::constants::solver;

/// Mass flow rates of the three conserved species (kg/s).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Flow {
    pub a: f64,
    pub b: f64,
    pub waste: f64,
}

impl Flow {
    pub const ZERO: Flow = Flow { a: 0.0, b: 0.0, waste: 0.0 };

    pub fn new(a: f64, b: f64, waste: f64) -> Self {
        Flow { a, b, waste }
    }

    /// Total solids rate across all three species.
    pub fn total(&self) -> f64 {
        self.a + self.b + self.waste
    }
}

impl Add for Flow {
    type Output = Flow;

    fn add(self, rhs: Flow) -> Flow {
        Flow {
            a: self.a + rhs.a,
            b: self.b + rhs.b,
            waste: self.waste + rhs.waste,
        }
    }
}

impl AddAssign for Flow {
    fn add_assign(&mut self, rhs: Flow) {
        self.a += rhs.a;
        self.b += rhs.b;
        self.waste += rhs.waste;
    }
}

/// One separation cell in the circuit.
///
/// Outlet destinations are indices into the extended node space
/// `[0, n + 3)`, where the last three indices are the A-product,
/// B-product and tailings sinks.
#[derive(Clone, Debug)]
pub struct Unit {
    /// Destination of the concentrate stream.
    pub conc_dst: usize,
    /// Destination of the tailings stream.
    pub tail_dst: usize,

    /// Cell volume (m³), kept within `[v_min, v_max]` by [`Unit::set_volume`].
    pub volume: f64,
    pub v_min: f64,
    pub v_max: f64,

    /// Rate constants routing each species to concentrate (s⁻¹).
    pub k_a: f64,
    pub k_b: f64,
    pub k_waste: f64,

    /// Inlet feed for the current solver iteration.
    pub feed: Flow,
    /// Concentrate stream computed by the last [`Unit::process`] call.
    pub conc: Flow,
    /// Tailings stream computed by the last [`Unit::process`] call.
    pub tail: Flow,
}

impl Unit {
    pub fn new(conc_dst: usize, tail_dst: usize, params: &CircuitParams) -> Self {
        Unit {
            conc_dst,
            tail_dst,
            volume: params.default_volume,
            v_min: params.min_volume,
            v_max: params.max_volume,
            k_a: params.k_a,
            k_b: params.k_b,
            k_waste: params.k_waste,
            feed: Flow::ZERO,
            conc: Flow::ZERO,
            tail: Flow::ZERO,
        }
    }

    /// Split the current feed into concentrate and tailings.
    ///
    /// The total solids rate is floored at a small constant so a starved
    /// cell produces a finite residence time instead of a singularity.
    pub fn process(&mut self, density: f64, solids_fraction: f64) {
        let total = self.feed.total().max(solver::MIN_FLOW);
        let tau = solids_fraction * self.volume * density / total;

        let recover = |k: f64| k * tau / (1.0 + k * tau);
        let r_a = recover(self.k_a);
        let r_b = recover(self.k_b);
        let r_w = recover(self.k_waste);

        self.conc = Flow {
            a: self.feed.a * r_a,
            b: self.feed.b * r_b,
            waste: self.feed.waste * r_w,
        };
        // Tailings are the exact complement of the concentrate.
        self.tail = Flow {
            a: self.feed.a - self.conc.a,
            b: self.feed.b - self.conc.b,
            waste: self.feed.waste - self.conc.waste,
        };
    }

    /// Scale the cell volume into `[v_min, v_max]` from a normalized β.
    pub fn set_volume(&mut self, beta: f64) {
        let beta = beta.clamp(0.0, 1.0);
        self.volume = self.v_min + (self.v_max - self.v_min) * beta;
    }
}
