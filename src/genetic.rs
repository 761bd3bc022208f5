//! Genetic optimization over circuit genomes.
//!
//! Three variants share the same machinery: a discrete GA over the
//! connection vector, a continuous GA over normalized cell volumes, and
//! a hybrid pass that alternates the two. Generations run serially on
//! the controller; fitness evaluation fans out over rayon because
//! individual evaluations vary wildly in cost (invalid genomes
//! short-circuit, convergent circuits iterate to tolerance). Selection
//! and variation draw only from the controller's generator, so a fixed
//! seed reproduces a run regardless of worker count.

use crate::config::Parameters;
use log::{error, info, warn};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

/// Fitness assigned during evaluation to candidates the validity
/// predicate rejects.
pub const INVALID_PENALTY: f64 = -1e9;

/// Statistics from the most recent optimizer run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GaStats {
    pub best_fitness: f64,
    pub generations: usize,
    pub average_fitness: f64,
    pub stddev: f64,
    pub elapsed_seconds: f64,
    pub converged: bool,
}

fn controller_rng(seed: i64) -> StdRng {
    if seed >= 0 {
        StdRng::seed_from_u64(seed as u64)
    } else {
        StdRng::from_entropy()
    }
}

fn degenerate_stats(start: Instant) -> GaStats {
    GaStats {
        best_fitness: INVALID_PENALTY,
        generations: 0,
        average_fitness: INVALID_PENALTY,
        stddev: 0.0,
        elapsed_seconds: start.elapsed().as_secs_f64(),
        converged: false,
    }
}

fn argmax(values: &[f64]) -> (usize, f64) {
    let mut best_idx = 0;
    let mut best = values[0];
    for (i, &value) in values.iter().enumerate().skip(1) {
        if value > best {
            best_idx = i;
            best = value;
        }
    }
    (best_idx, best)
}

fn fitness_moments(values: &[f64]) -> (f64, f64) {
    let average = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - average).powi(2)).sum::<f64>() / values.len() as f64;
    (average, variance.sqrt())
}

/// K-way tournament over fitness, returning the winning index.
fn tournament_index<R: Rng>(fitnesses: &[f64], k: usize, rng: &mut R) -> usize {
    let mut best = rng.gen_range(0..fitnesses.len());
    for _ in 1..k.max(1) {
        let idx = rng.gen_range(0..fitnesses.len());
        if fitnesses[idx] > fitnesses[best] {
            best = idx;
        }
    }
    best
}

fn elite_indices(fitnesses: &[f64], count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..fitnesses.len()).collect();
    order.sort_by(|&a, &b| {
        fitnesses[b]
            .partial_cmp(&fitnesses[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(count.min(fitnesses.len()));
    order
}

// ---------------------------------------------------------------------
// Discrete templates and seeding
// ---------------------------------------------------------------------

/// Linear chain: concentrate flows forward to the next cell, tailings
/// alternate between the B product, the tailings sink and a recycle to
/// the first cell.
fn chain_template(n: usize) -> Vec<usize> {
    let mut vec = vec![0; 2 * n + 1];
    for i in 0..n {
        vec[2 * i + 1] = if i < n - 1 { i + 1 } else { n };
        vec[2 * i + 2] = match i % 3 {
            0 => n + 1,
            1 => n + 2,
            _ => 0,
        };
    }
    vec
}

/// Alternating outputs: even cells discharge to the A product and the
/// tailings sink, odd cells to the B product with a recycle.
fn alternating_template(n: usize) -> Vec<usize> {
    let mut vec = chain_template(n);
    for i in 0..n {
        if i % 2 == 0 {
            vec[2 * i + 1] = n;
            vec[2 * i + 2] = n + 2;
        } else {
            vec[2 * i + 1] = n + 1;
            vec[2 * i + 2] = 0;
        }
    }
    vec
}

/// Butterfly: the first half feeds the second half, which discharges to
/// the two products.
fn butterfly_template(n: usize) -> Vec<usize> {
    let mut vec = chain_template(n);
    for i in 0..n {
        if i < n / 2 {
            vec[2 * i + 1] = i + n / 2;
            vec[2 * i + 2] = n + 2;
        } else {
            vec[2 * i + 1] = n;
            vec[2 * i + 2] = n + 1;
        }
    }
    vec
}

/// The deterministic seed templates for an `n`-unit circuit. Not all of
/// them are structurally valid for every `n`; callers filter through the
/// validity predicate.
pub fn default_templates(n: usize) -> Vec<Vec<usize>> {
    vec![chain_template(n), alternating_template(n), butterfly_template(n)]
}

/// Apply a handful of random single-connection edits to a template,
/// keeping each edit only if the whole genome still validates.
fn vary_template<R, V>(template: &[usize], n: usize, validity: &V, rng: &mut R) -> Vec<usize>
where
    R: Rng,
    V: Fn(&[usize]) -> bool,
{
    let num_changes = rng.gen_range(1..=n.max(1));

    for _ in 0..20 {
        let mut candidate = template.to_vec();

        for _ in 0..num_changes {
            // Pick a connection slot (never the feed slot) and try
            // destinations in random order until one keeps validity.
            let pos = rng.gen_range(1..=2 * n);
            let unit_idx = (pos - 1) / 2;
            let partner = if pos % 2 == 1 { pos + 1 } else { pos - 1 };

            let mut destinations: Vec<usize> = (0..n + 3).filter(|&d| d != unit_idx).collect();
            destinations.shuffle(rng);

            for dst in destinations {
                if candidate[partner] == dst {
                    continue;
                }
                let old = candidate[pos];
                candidate[pos] = dst;
                if validity(&candidate) {
                    break;
                }
                candidate[pos] = old;
            }
        }

        if validity(&candidate) {
            return candidate;
        }
    }

    template.to_vec()
}

/// Build a deduplicated population of valid circuits from the templates.
fn seed_discrete_population<R, V>(
    target: usize,
    n: usize,
    validity: &V,
    rng: &mut R,
) -> Vec<Vec<usize>>
where
    R: Rng,
    V: Fn(&[usize]) -> bool,
{
    let templates: Vec<Vec<usize>> = default_templates(n)
        .into_iter()
        .filter(|t| validity(t))
        .collect();
    if templates.is_empty() {
        warn!("no seed template is valid for {n} units");
        return Vec::new();
    }

    let mut population = Vec::new();
    let mut unique: HashSet<Vec<usize>> = HashSet::new();
    for template in &templates {
        if population.len() >= target {
            break;
        }
        if unique.insert(template.clone()) {
            population.push(template.clone());
        }
    }

    let max_attempts = target.saturating_mul(10);
    let mut attempts = 0;
    while population.len() < target && attempts < max_attempts {
        let template = &templates[rng.gen_range(0..templates.len())];
        let candidate = vary_template(template, n, validity, rng);
        if unique.insert(candidate.clone()) {
            population.push(candidate);
        }
        attempts += 1;
    }

    if population.len() < target {
        warn!(
            "seeded only {}/{} valid circuits; continuing with a smaller population",
            population.len(),
            target
        );
    }
    population
}

// ---------------------------------------------------------------------
// Discrete variation operators
// ---------------------------------------------------------------------

/// Multi-point crossover with a cut count that shrinks as the run
/// progresses: broad exploration early, fine exchanges late.
fn multipoint_crossover<R: Rng>(
    c1: &mut [usize],
    c2: &mut [usize],
    generation: usize,
    params: &Parameters,
    rng: &mut R,
) {
    let len = c1.len();
    let progress = generation as f64 / params.max_iterations.max(1) as f64;
    let max_points = params.crossover_points.max(1).min((len / 2).max(1));
    let cuts = (((1.0 - progress) * max_points as f64) as usize).max(1);

    let mut cut_mask = vec![false; len];
    for _ in 0..cuts {
        cut_mask[rng.gen_range(0..len)] = true;
    }

    let mut swapping = false;
    for j in 0..len {
        if cut_mask[j] {
            swapping = !swapping;
        }
        if swapping {
            std::mem::swap(&mut c1[j], &mut c2[j]);
        }
    }
}

/// Per-gene integer creep, wrapped or clamped into `[0, n + 2]`.
fn creep_mutation<R: Rng>(child: &mut [usize], n: usize, params: &Parameters, rng: &mut R) {
    let max_gene = (n + 2) as i64;
    let range = max_gene + 1;
    let step_size = (params.mutation_step_size as i64).max(1);

    for gene in child.iter_mut() {
        if rng.gen::<f64>() < params.mutation_probability {
            let step = rng.gen_range(-step_size..=step_size);
            let value = *gene as i64 + step;
            *gene = if params.allow_mutation_wrapping {
                value.rem_euclid(range) as usize
            } else {
                value.clamp(0, max_gene) as usize
            };
        }
    }
}

/// Reverse a random slice of the genome.
fn inversion_mutation<R: Rng>(child: &mut [usize], probability: f64, rng: &mut R) {
    if child.len() < 2 || rng.gen::<f64>() >= probability {
        return;
    }
    let a = rng.gen_range(0..child.len() - 1);
    let b = rng.gen_range(a + 1..child.len());
    child[a..=b].reverse();
}

// ---------------------------------------------------------------------
// Optimizers
// ---------------------------------------------------------------------

/// Evolve the discrete connection vector. The best genome found is
/// written back into `genome`.
pub fn optimize_discrete<F, V>(
    genome: &mut [usize],
    fitness: F,
    validity: V,
    params: &Parameters,
) -> GaStats
where
    F: Fn(&[usize]) -> f64 + Sync,
    V: Fn(&[usize]) -> bool + Sync,
{
    let start = Instant::now();
    if genome.is_empty() || genome.len() % 2 == 0 {
        error!("discrete optimization needs a genome buffer of length 2n + 1");
        return degenerate_stats(start);
    }
    let n = genome.len() / 2;
    let mut rng = controller_rng(params.random_seed);

    info!("seeding initial population for {n} units");
    let mut population = seed_discrete_population(params.population_size, n, &validity, &mut rng);
    if population.is_empty() {
        error!("could not seed any valid circuit for {n} units");
        return degenerate_stats(start);
    }

    let mut best_overall = f64::NEG_INFINITY;
    let mut stall = 0usize;
    let mut generations = 0usize;
    let mut converged = false;
    let k = params.tournament_size.max(1);

    for generation in 0..params.max_iterations {
        generations = generation + 1;

        let fitnesses: Vec<f64> = population
            .par_iter()
            .map(|g| if validity(g) { fitness(g) } else { INVALID_PENALTY })
            .collect();

        let (_, generation_best) = argmax(&fitnesses);
        if generation_best > best_overall + params.convergence_threshold {
            best_overall = generation_best;
            stall = 0;
        } else {
            stall += 1;
        }
        if stall >= params.stall_generations {
            info!("[ga] no improvement for {stall} generations; stopping early");
            converged = true;
            break;
        }

        let mut next_gen: Vec<Vec<usize>> = elite_indices(&fitnesses, params.elite_count)
            .into_iter()
            .map(|i| population[i].clone())
            .collect();

        let mut attempts = 0usize;
        let max_attempts = population.len().saturating_mul(20);
        while next_gen.len() < population.len() {
            if attempts >= max_attempts {
                // Valid offspring are scarce; fill the rest with
                // tournament-selected parents.
                while next_gen.len() < population.len() {
                    let idx = tournament_index(&fitnesses, k, &mut rng);
                    next_gen.push(population[idx].clone());
                }
                break;
            }
            attempts += 1;

            let mut c1 = population[tournament_index(&fitnesses, k, &mut rng)].clone();
            let mut c2 = population[tournament_index(&fitnesses, k, &mut rng)].clone();

            if rng.gen::<f64>() < params.crossover_probability {
                multipoint_crossover(&mut c1, &mut c2, generation, params, &mut rng);
            }
            creep_mutation(&mut c1, n, params, &mut rng);
            creep_mutation(&mut c2, n, params, &mut rng);
            if params.use_inversion {
                inversion_mutation(&mut c1, params.inversion_probability, &mut rng);
                inversion_mutation(&mut c2, params.inversion_probability, &mut rng);
            }

            if validity(&c1) {
                next_gen.push(c1);
            }
            if next_gen.len() < population.len() && validity(&c2) {
                next_gen.push(c2);
            }
        }
        population = next_gen;

        if params.verbose && generation % 10 == 0 {
            info!("[ga] gen {generation} best fitness {generation_best:.6}");
        }
    }

    let final_fitnesses: Vec<f64> = population
        .par_iter()
        .map(|g| if validity(g) { fitness(g) } else { INVALID_PENALTY })
        .collect();
    let (best_idx, best_fitness) = argmax(&final_fitnesses);
    genome.copy_from_slice(&population[best_idx]);

    let (average_fitness, stddev) = fitness_moments(&final_fitnesses);
    let elapsed_seconds = start.elapsed().as_secs_f64();
    info!("[ga] completed in {elapsed_seconds:.2}s, best fitness {best_fitness:.6}");

    GaStats {
        best_fitness,
        generations,
        average_fitness,
        stddev,
        elapsed_seconds,
        converged,
    }
}

/// Evolve the continuous volume parameters. The best vector found is
/// written back into `beta`.
pub fn optimize_continuous<F, V>(
    beta: &mut [f64],
    fitness: F,
    validity: V,
    params: &Parameters,
) -> GaStats
where
    F: Fn(&[f64]) -> f64 + Sync,
    V: Fn(&[f64]) -> bool + Sync,
{
    let start = Instant::now();
    if beta.is_empty() {
        error!("continuous optimization needs a non-empty parameter buffer");
        return degenerate_stats(start);
    }
    let len = beta.len();
    let mut rng = controller_rng(params.random_seed);

    let mut population: Vec<Vec<f64>> = Vec::new();
    let max_seed_attempts = params.population_size.saturating_mul(10);
    let mut attempts = 0usize;
    while population.len() < params.population_size && attempts < max_seed_attempts {
        let candidate: Vec<f64> = (0..len).map(|_| rng.gen::<f64>()).collect();
        if validity(&candidate) {
            population.push(candidate);
        }
        attempts += 1;
    }
    if population.is_empty() {
        error!("could not seed any valid volume vector");
        return degenerate_stats(start);
    }
    if population.len() < params.population_size {
        warn!(
            "seeded only {}/{} valid volume vectors; continuing with a smaller population",
            population.len(),
            params.population_size
        );
    }

    let mut best_overall = f64::NEG_INFINITY;
    let mut stall = 0usize;
    let mut generations = 0usize;
    let mut converged = false;
    let k = params.tournament_size.max(1);

    let scale_lo = params.scaling_mutation_min;
    let scale_hi = params.scaling_mutation_max.max(scale_lo);

    for generation in 0..params.max_iterations {
        generations = generation + 1;

        let fitnesses: Vec<f64> = population
            .par_iter()
            .map(|b| if validity(b) { fitness(b) } else { INVALID_PENALTY })
            .collect();

        let (_, generation_best) = argmax(&fitnesses);
        if generation_best > best_overall + params.convergence_threshold {
            best_overall = generation_best;
            stall = 0;
        } else {
            stall += 1;
        }
        if stall >= params.stall_generations {
            info!("[ga] no improvement for {stall} generations; stopping early");
            converged = true;
            break;
        }

        let mut next_gen: Vec<Vec<f64>> = elite_indices(&fitnesses, params.elite_count)
            .into_iter()
            .map(|i| population[i].clone())
            .collect();

        while next_gen.len() < population.len() {
            let mut c1 = population[tournament_index(&fitnesses, k, &mut rng)].clone();
            let mut c2 = population[tournament_index(&fitnesses, k, &mut rng)].clone();

            if rng.gen::<f64>() < params.crossover_probability {
                for j in 0..len {
                    if rng.gen::<f64>() < 0.5 {
                        let tmp = c1[j];
                        c1[j] = c2[j];
                        c2[j] = tmp;
                    }
                }
            }

            for child in [&mut c1, &mut c2] {
                for gene in child.iter_mut() {
                    if rng.gen::<f64>() < params.mutation_probability {
                        let step = rng.gen::<f64>() * params.mutation_step_size;
                        let sign = if rng.gen::<f64>() < 0.5 { -1.0 } else { 1.0 };
                        *gene = (*gene + step * sign).clamp(0.0, 1.0);
                    }
                }
                if params.use_scaling_mutation && rng.gen::<f64>() < params.scaling_mutation_prob {
                    let idx = rng.gen_range(0..len);
                    let factor = rng.gen_range(scale_lo..=scale_hi);
                    child[idx] = (child[idx] * factor).clamp(0.0, 1.0);
                }
            }

            next_gen.push(c1);
            if next_gen.len() < population.len() {
                next_gen.push(c2);
            }
        }
        population = next_gen;

        if params.verbose && generation % 10 == 0 {
            info!("[ga] gen {generation} best fitness {generation_best:.6}");
        }
    }

    let final_fitnesses: Vec<f64> = population
        .par_iter()
        .map(|b| if validity(b) { fitness(b) } else { INVALID_PENALTY })
        .collect();
    let (best_idx, best_fitness) = argmax(&final_fitnesses);
    beta.copy_from_slice(&population[best_idx]);

    let (average_fitness, stddev) = fitness_moments(&final_fitnesses);
    let elapsed_seconds = start.elapsed().as_secs_f64();
    info!("[ga] completed in {elapsed_seconds:.2}s, best fitness {best_fitness:.6}");

    GaStats {
        best_fitness,
        generations,
        average_fitness,
        stddev,
        elapsed_seconds,
        converged,
    }
}

/// Alternating coordinate descent over the paired genome: a discrete
/// pass with the volumes fixed, then a continuous pass with the
/// resulting wiring fixed. Both buffers end up holding the best pair.
pub fn optimize_hybrid<F, V>(
    genome: &mut [usize],
    beta: &mut [f64],
    fitness: F,
    validity: V,
    params: &Parameters,
) -> GaStats
where
    F: Fn(&[usize], &[f64]) -> f64 + Sync,
    V: Fn(&[usize], &[f64]) -> bool + Sync,
{
    let discrete_stats = {
        let beta_fixed: &[f64] = beta;
        optimize_discrete(
            genome,
            |g| fitness(g, beta_fixed),
            |g| validity(g, beta_fixed),
            params,
        )
    };

    let continuous_stats = {
        let genome_fixed: &[usize] = genome;
        optimize_continuous(
            beta,
            |b| fitness(genome_fixed, b),
            |b| validity(genome_fixed, b),
            params,
        )
    };

    GaStats {
        best_fitness: continuous_stats.best_fitness,
        generations: discrete_stats.generations + continuous_stats.generations,
        average_fitness: continuous_stats.average_fitness,
        stddev: continuous_stats.stddev,
        elapsed_seconds: discrete_stats.elapsed_seconds + continuous_stats.elapsed_seconds,
        converged: discrete_stats.converged && continuous_stats.converged,
    }
}
