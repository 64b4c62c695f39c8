//! Optimization driver: wraps a converged [`ModelGraph`] in a bounded,
//! constrained minimizer whose gradients come from finite differences across
//! full re-solves.

use crate::cancel::CancellationToken;
use crate::cobyla::Cobyla;
use crate::error::{AssemblyError, EngineError};
use crate::model::{ModelGraph, ResultEntry, SolvePhase};
use crate::traits::{Evaluation, OptimizationProblem, Optimizer, OptimizerOutcome};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Major iterations: multiplier updates for the augmented Lagrangian,
    /// trust-radius reductions for COBYLA, simplex steps per restart for
    /// Nelder-Mead.
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Hard cap on model evaluations across the whole run.
    pub max_evaluations: usize,
    /// Relative forward-difference step.
    pub finite_difference_step: f64,
    /// Largest constraint or bound violation accepted at the final point.
    pub feasibility_tolerance: f64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
            max_evaluations: 20_000,
            finite_difference_step: 1e-6,
            feasibility_tolerance: 1e-6,
        }
    }
}

impl DriverSettings {
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let invalid = |msg: &str| Err(AssemblyError::InvalidSettings(msg.to_string()));
        if self.max_iterations == 0 {
            return invalid("driver max_iterations must be greater than zero");
        }
        if self.max_evaluations == 0 {
            return invalid("driver max_evaluations must be greater than zero");
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.tolerance) {
            return invalid("driver tolerance must be positive and finite");
        }
        if !positive(self.finite_difference_step) {
            return invalid("driver finite_difference_step must be positive and finite");
        }
        if !positive(self.feasibility_tolerance) {
            return invalid("driver feasibility_tolerance must be positive and finite");
        }
        Ok(())
    }
}

/// Built-in optimizers, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    AugmentedLagrangian,
    Cobyla,
    NelderMead,
}

impl OptimizerKind {
    /// Case-insensitive; `-`, `_` and spaces are ignored. `SLSQP` selects the
    /// gradient-based optimizer.
    pub fn from_name(name: &str) -> Result<Self, EngineError> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "augmentedlagrangian" | "slsqp" | "gradient" => Ok(Self::AugmentedLagrangian),
            "cobyla" | "linearapproximation" => Ok(Self::Cobyla),
            "neldermead" | "simplex" => Ok(Self::NelderMead),
            _ => Err(EngineError::DriverConfiguration(format!(
                "unsupported optimizer '{name}'"
            ))),
        }
    }

    pub fn optimizer(self) -> Box<dyn Optimizer> {
        match self {
            Self::AugmentedLagrangian => Box::new(AugmentedLagrangian),
            Self::Cobyla => Box::new(Cobyla),
            Self::NelderMead => Box::new(NelderMead),
        }
    }
}

/// Summary of one optimize run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub optimizer: String,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

impl ModelGraph {
    /// Optimize mode. Returns the objective followed by every design variable
    /// at the final point.
    pub fn optimize(
        &mut self,
        optimizer: &dyn Optimizer,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ResultEntry>, OptimizationReport), EngineError> {
        self.restore_independents();
        self.transition(SolvePhase::Converging);
        let outcome = match self.converge(cancel) {
            Ok(()) => {
                self.transition(SolvePhase::Optimizing);
                self.drive(optimizer, cancel)
            }
            Err(err) => Err(err),
        };
        match outcome {
            Ok(done) => {
                self.transition(SolvePhase::Converged);
                Ok(done)
            }
            Err(err) => {
                self.transition(SolvePhase::OptimizingFailed);
                Err(err)
            }
        }
    }

    fn drive(
        &mut self,
        optimizer: &dyn Optimizer,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ResultEntry>, OptimizationReport), EngineError> {
        if self.design_variables.is_empty() {
            return Err(EngineError::DriverConfiguration(
                "optimize mode needs at least one design variable".to_string(),
            ));
        }
        let settings = self.settings.driver;

        let bounds: Vec<(f64, f64)> = self
            .design_variables
            .iter()
            .map(|dv| {
                let variable = self.registry.variable(dv.var);
                (
                    variable.lower_bound.unwrap_or(f64::NEG_INFINITY),
                    variable.upper_bound.unwrap_or(f64::INFINITY),
                )
            })
            .collect();
        let start: Vec<f64> = self
            .design_variables
            .iter()
            .zip(&bounds)
            .map(|(dv, &(lower, upper))| self.registry.value_at(dv.var).max(lower).min(upper))
            .collect();
        let constraint_bounds: Vec<(f64, f64)> = self
            .constraints
            .iter()
            .map(|c| {
                (
                    c.lower.unwrap_or(f64::NEG_INFINITY),
                    c.upper.unwrap_or(f64::INFINITY),
                )
            })
            .collect();

        log::info!(
            "optimizing {} design variable(s) with {}",
            start.len(),
            optimizer.name()
        );
        let outcome = {
            let mut problem = ModelProblem {
                model: self,
                cancel,
                bounds: bounds.clone(),
                constraint_bounds: constraint_bounds.clone(),
            };
            optimizer.minimize(&mut problem, &start, &settings, cancel)?
        };

        // Leave the registry at the reported point.
        for (dv, &value) in self.design_variables.iter().zip(&outcome.x) {
            self.registry.set_at(dv.var, value);
        }
        self.converge(cancel)?;

        for (constraint, &(lower, upper)) in self.constraints.iter().zip(&constraint_bounds) {
            let value = self.registry.value_at(constraint.output);
            let violation = violation(value, lower, upper);
            if violation > settings.feasibility_tolerance {
                return Err(EngineError::InfeasibleProblem(format!(
                    "constraint '{}' = {} violates [{}, {}] by {:e}",
                    constraint.name, value, lower, upper, violation
                )));
            }
        }
        for (dv, &(lower, upper)) in self.design_variables.iter().zip(&bounds) {
            let value = self.registry.value_at(dv.var);
            if violation(value, lower, upper) > settings.feasibility_tolerance {
                return Err(EngineError::InfeasibleProblem(format!(
                    "design variable '{}' = {} lies outside [{}, {}]",
                    dv.label, value, lower, upper
                )));
            }
        }

        let mut results = vec![ResultEntry::new(
            self.objective.id.clone(),
            self.objective_value(),
        )];
        results.extend(
            self.design_variables
                .iter()
                .map(|dv| ResultEntry::new(dv.label.clone(), self.registry.value_at(dv.var))),
        );
        let report = OptimizationReport {
            optimizer: optimizer.name().to_string(),
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
            converged: outcome.converged,
        };
        log::info!(
            "{} finished after {} iteration(s), {} evaluation(s), converged: {}",
            report.optimizer,
            report.iterations,
            report.evaluations,
            report.converged
        );
        if !report.converged {
            log::warn!(
                "{} stopped before converging; results are the best point found",
                report.optimizer
            );
        }
        Ok((results, report))
    }
}

/// Presents a model graph to an [`Optimizer`]: each evaluation writes the
/// design point and re-converges every group.
struct ModelProblem<'m> {
    model: &'m mut ModelGraph,
    cancel: &'m CancellationToken,
    bounds: Vec<(f64, f64)>,
    constraint_bounds: Vec<(f64, f64)>,
}

impl OptimizationProblem for ModelProblem<'_> {
    fn dimension(&self) -> usize {
        self.bounds.len()
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    fn constraint_bounds(&self) -> &[(f64, f64)] {
        &self.constraint_bounds
    }

    fn evaluate(&mut self, x: &[f64]) -> Result<Evaluation, EngineError> {
        let model = &mut *self.model;
        for (dv, &value) in model.design_variables.iter().zip(x) {
            model.registry.set_at(dv.var, value);
        }
        model.converge(self.cancel)?;
        Ok(Evaluation {
            objective: model.objective_value(),
            constraints: model
                .constraints
                .iter()
                .map(|c| model.registry.value_at(c.output))
                .collect(),
        })
    }
}

fn violation(value: f64, lower: f64, upper: f64) -> f64 {
    (lower - value).max(value - upper).max(0.0)
}

fn max_violation(values: &[f64], bounds: &[(f64, f64)]) -> f64 {
    values
        .iter()
        .zip(bounds)
        .map(|(&value, &(lower, upper))| violation(value, lower, upper))
        .fold(0.0, f64::max)
}

pub(crate) fn project(x: &DVector<f64>, bounds: &[(f64, f64)]) -> DVector<f64> {
    DVector::from_iterator(
        x.len(),
        x.iter()
            .zip(bounds)
            .map(|(&v, &(lower, upper))| v.max(lower).min(upper)),
    )
}

/// Counts evaluations and refuses to exceed the budget.
pub(crate) struct Budget<'p> {
    problem: &'p mut dyn OptimizationProblem,
    pub(crate) used: usize,
    limit: usize,
}

impl<'p> Budget<'p> {
    pub(crate) fn new(problem: &'p mut dyn OptimizationProblem, limit: usize) -> Self {
        Self {
            problem,
            used: 0,
            limit,
        }
    }

    /// `None` once the budget is spent.
    pub(crate) fn evaluate(&mut self, x: &DVector<f64>) -> Result<Option<Evaluation>, EngineError> {
        if self.used >= self.limit {
            return Ok(None);
        }
        self.used += 1;
        self.problem.evaluate(x.as_slice()).map(Some)
    }

    pub(crate) fn first(&mut self, x: &DVector<f64>) -> Result<Evaluation, EngineError> {
        self.evaluate(x)?.ok_or_else(|| {
            EngineError::DriverConfiguration(
                "evaluation budget exhausted before the first evaluation".to_string(),
            )
        })
    }
}

// --- Augmented Lagrangian ---

const INITIAL_PENALTY: f64 = 10.0;
const PENALTY_GROWTH: f64 = 10.0;
const MAX_PENALTY: f64 = 1e8;
const MAX_INNER_STEPS: usize = 200;
const MAX_BACKTRACKS: usize = 40;
const ARMIJO: f64 = 1e-4;
const MAX_STEP: f64 = 1e6;

/// One side of a two-sided constraint bound, written as `c(x) <= 0`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Inequality {
    Lower(usize, f64),
    Upper(usize, f64),
}

impl Inequality {
    pub(crate) fn value(self, evaluation: &Evaluation) -> f64 {
        match self {
            Self::Lower(i, bound) => bound - evaluation.constraints[i],
            Self::Upper(i, bound) => evaluation.constraints[i] - bound,
        }
    }
}

pub(crate) fn inequalities(constraint_bounds: &[(f64, f64)]) -> Vec<Inequality> {
    let mut out = Vec::new();
    for (i, &(lower, upper)) in constraint_bounds.iter().enumerate() {
        if lower.is_finite() {
            out.push(Inequality::Lower(i, lower));
        }
        if upper.is_finite() {
            out.push(Inequality::Upper(i, upper));
        }
    }
    out
}

/// `f + 1/(2 mu) * sum(max(0, lambda + mu c)^2 - lambda^2)`
fn augmented_lagrangian(
    evaluation: &Evaluation,
    inequalities: &[Inequality],
    lambda: &[f64],
    mu: f64,
) -> f64 {
    let penalty: f64 = inequalities
        .iter()
        .zip(lambda)
        .map(|(ineq, &l)| {
            let shifted = (l + mu * ineq.value(evaluation)).max(0.0);
            shifted * shifted - l * l
        })
        .sum();
    evaluation.objective + penalty / (2.0 * mu)
}

/// Forward differences of `merit`, stepping backwards at an upper bound.
/// Steps never leave the box; fixed coordinates get a zero derivative.
fn finite_difference_gradient<F>(
    budget: &mut Budget<'_>,
    x: &DVector<f64>,
    value: f64,
    bounds: &[(f64, f64)],
    relative_step: f64,
    merit: F,
) -> Result<Option<DVector<f64>>, EngineError>
where
    F: Fn(&Evaluation) -> f64,
{
    let mut gradient = DVector::zeros(x.len());
    for (i, &(lower, upper)) in bounds.iter().enumerate() {
        if lower >= upper {
            continue;
        }
        let h = relative_step * x[i].abs().max(1.0);
        let forward = upper - x[i];
        let backward = x[i] - lower;
        let signed = if forward >= h {
            h
        } else if backward >= h {
            -h
        } else if forward >= backward {
            forward
        } else {
            -backward
        };
        let mut shifted = x.clone();
        shifted[i] = (x[i] + signed).max(lower).min(upper);
        let taken = shifted[i] - x[i];
        if taken == 0.0 {
            continue;
        }
        let Some(evaluation) = budget.evaluate(&shifted)? else {
            return Ok(None);
        };
        gradient[i] = (merit(&evaluation) - value) / taken;
    }
    Ok(Some(gradient))
}

/// Gradient-based optimizer for bound- and constraint-limited problems.
///
/// The inner loop runs box-projected steepest descent with Armijo
/// backtracking on the augmented Lagrangian; the outer loop updates the
/// multipliers and grows the penalty while feasibility stalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct AugmentedLagrangian;

impl Optimizer for AugmentedLagrangian {
    fn name(&self) -> &'static str {
        "augmented_lagrangian"
    }

    fn minimize(
        &self,
        problem: &mut dyn OptimizationProblem,
        start: &[f64],
        settings: &DriverSettings,
        cancel: &CancellationToken,
    ) -> Result<OptimizerOutcome, EngineError> {
        let bounds = problem.bounds().to_vec();
        let constraint_bounds = problem.constraint_bounds().to_vec();
        let inequalities = inequalities(&constraint_bounds);
        let mut budget = Budget::new(problem, settings.max_evaluations);

        let mut x = project(&DVector::from_column_slice(start), &bounds);
        let mut current = budget.first(&x)?;
        let mut lambda = vec![0.0; inequalities.len()];
        let mut mu = INITIAL_PENALTY;
        let mut previous_violation = max_violation(&current.constraints, &constraint_bounds);
        let mut iterations = 0;
        let mut converged = false;

        'outer: for outer in 0..settings.max_iterations {
            cancel.check()?;
            iterations = outer + 1;

            let merit = |e: &Evaluation| augmented_lagrangian(e, &inequalities, &lambda, mu);
            let mut value = merit(&current);
            let mut step = 1.0;

            for _ in 0..MAX_INNER_STEPS {
                cancel.check()?;
                let Some(gradient) = finite_difference_gradient(
                    &mut budget,
                    &x,
                    value,
                    &bounds,
                    settings.finite_difference_step,
                    merit,
                )?
                else {
                    break 'outer;
                };

                let mut accepted = None;
                let mut trial = step;
                for _ in 0..MAX_BACKTRACKS {
                    let candidate = project(&(&x - &gradient * trial), &bounds);
                    let delta = &candidate - &x;
                    if delta.amax() == 0.0 {
                        break;
                    }
                    let Some(evaluation) = budget.evaluate(&candidate)? else {
                        break 'outer;
                    };
                    let candidate_value = merit(&evaluation);
                    if candidate_value <= value + ARMIJO * gradient.dot(&delta) {
                        accepted = Some((candidate, evaluation, candidate_value));
                        break;
                    }
                    trial *= 0.5;
                }
                let Some((candidate, evaluation, candidate_value)) = accepted else {
                    break;
                };

                let moved = (&candidate - &x).amax();
                let improvement = value - candidate_value;
                x = candidate;
                current = evaluation;
                value = candidate_value;
                step = (trial * 2.0).min(MAX_STEP);
                if moved <= settings.tolerance * (1.0 + x.amax())
                    && improvement <= settings.tolerance * (1.0 + value.abs())
                {
                    break;
                }
            }

            let mut shift = 0.0_f64;
            for (ineq, l) in inequalities.iter().zip(lambda.iter_mut()) {
                let updated = (*l + mu * ineq.value(&current)).max(0.0);
                shift = shift.max((updated - *l).abs() / mu);
                *l = updated;
            }
            let violation = max_violation(&current.constraints, &constraint_bounds);
            log::debug!(
                "augmented lagrangian iteration {}: objective {:e}, violation {:e}, penalty {:e}",
                iterations,
                current.objective,
                violation,
                mu
            );

            if violation <= settings.feasibility_tolerance && shift <= settings.feasibility_tolerance {
                converged = true;
                break;
            }
            if violation > 0.25 * previous_violation {
                mu = (mu * PENALTY_GROWTH).min(MAX_PENALTY);
            }
            previous_violation = violation;
        }

        Ok(OptimizerOutcome {
            x: x.iter().copied().collect(),
            evaluation: current,
            iterations,
            evaluations: budget.used,
            converged,
        })
    }
}

// --- Nelder-Mead ---

const INITIAL_SIMPLEX_SCALE: f64 = 0.05;
const INITIAL_QUADRATIC_PENALTY: f64 = 1e3;
const MAX_QUADRATIC_PENALTY: f64 = 1e12;
const MAX_PENALTY_ROUNDS: usize = 10;

struct Vertex {
    x: DVector<f64>,
    evaluation: Evaluation,
    value: f64,
}

/// Derivative-free simplex search. Constraints enter through an exterior
/// quadratic penalty that grows between rounds until the best vertex is
/// feasible; every vertex is clamped into the design box.
///
/// Within a round the simplex is rebuilt around the best vertex whenever a
/// search ends, until a fresh simplex no longer improves on it. Only the
/// evaluation budget bounds the number of restarts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NelderMead;

impl NelderMead {
    /// Runs one simplex search from `start`, stopping when the simplex
    /// collapses or after `max_iterations` steps. Returns the best vertex and
    /// the number of steps taken.
    fn search<F>(
        budget: &mut Budget<'_>,
        start: Vertex,
        bounds: &[(f64, f64)],
        settings: &DriverSettings,
        cancel: &CancellationToken,
        penalized: F,
    ) -> Result<(Vertex, usize), EngineError>
    where
        F: Fn(&Evaluation) -> f64,
    {
        let n = start.x.len();
        let mut simplex = Vec::with_capacity(n + 1);
        for i in 0..n {
            let (lower, upper) = bounds[i];
            let delta = INITIAL_SIMPLEX_SCALE * start.x[i].abs().max(1.0);
            let mut x = start.x.clone();
            x[i] = if start.x[i] + delta <= upper {
                start.x[i] + delta
            } else {
                (start.x[i] - delta).max(lower)
            };
            let Some(evaluation) = budget.evaluate(&x)? else {
                return Ok((start, 0));
            };
            let value = penalized(&evaluation);
            simplex.push(Vertex { x, evaluation, value });
        }
        simplex.push(start);

        let mut iterations = 0;
        'search: while iterations < settings.max_iterations {
            cancel.check()?;
            simplex.sort_by(|a, b| a.value.total_cmp(&b.value));

            let best = &simplex[0];
            let worst = &simplex[n];
            let spread = worst.value - best.value;
            let width = simplex[1..]
                .iter()
                .map(|v| (&v.x - &best.x).amax())
                .fold(0.0, f64::max);
            if width == 0.0
                || (spread <= settings.tolerance * (1.0 + best.value.abs())
                    && width <= settings.tolerance.sqrt() * (1.0 + best.x.amax()))
            {
                break;
            }
            iterations += 1;

            let centroid = simplex[..n]
                .iter()
                .fold(DVector::zeros(n), |acc, v| acc + &v.x)
                / n as f64;
            let toward = |t: f64| project(&(&centroid + (&centroid - &simplex[n].x) * t), bounds);

            let reflected_x = toward(1.0);
            let Some(reflected) = budget.evaluate(&reflected_x)? else {
                break;
            };
            let reflected_value = penalized(&reflected);

            let replacement = if reflected_value < simplex[0].value {
                let expanded_x = toward(2.0);
                let Some(expanded) = budget.evaluate(&expanded_x)? else {
                    break;
                };
                let expanded_value = penalized(&expanded);
                if expanded_value < reflected_value {
                    Some(Vertex { x: expanded_x, evaluation: expanded, value: expanded_value })
                } else {
                    Some(Vertex { x: reflected_x, evaluation: reflected, value: reflected_value })
                }
            } else if reflected_value < simplex[n - 1].value {
                Some(Vertex { x: reflected_x, evaluation: reflected, value: reflected_value })
            } else {
                let outside = reflected_value < simplex[n].value;
                let contracted_x = if outside { toward(0.5) } else { toward(-0.5) };
                let Some(contracted) = budget.evaluate(&contracted_x)? else {
                    break;
                };
                let contracted_value = penalized(&contracted);
                if contracted_value < reflected_value.min(simplex[n].value) {
                    Some(Vertex { x: contracted_x, evaluation: contracted, value: contracted_value })
                } else {
                    None
                }
            };

            match replacement {
                Some(vertex) => simplex[n] = vertex,
                None => {
                    let anchor = simplex[0].x.clone();
                    for vertex in simplex.iter_mut().skip(1) {
                        let x = project(&(&anchor + (&vertex.x - &anchor) * 0.5), bounds);
                        let Some(evaluation) = budget.evaluate(&x)? else {
                            break 'search;
                        };
                        vertex.value = penalized(&evaluation);
                        vertex.evaluation = evaluation;
                        vertex.x = x;
                    }
                }
            }
        }

        simplex.sort_by(|a, b| a.value.total_cmp(&b.value));
        let best = simplex.swap_remove(0);
        Ok((best, iterations))
    }
}

impl Optimizer for NelderMead {
    fn name(&self) -> &'static str {
        "nelder_mead"
    }

    fn minimize(
        &self,
        problem: &mut dyn OptimizationProblem,
        start: &[f64],
        settings: &DriverSettings,
        cancel: &CancellationToken,
    ) -> Result<OptimizerOutcome, EngineError> {
        let bounds = problem.bounds().to_vec();
        let constraint_bounds = problem.constraint_bounds().to_vec();
        let mut budget = Budget::new(problem, settings.max_evaluations);

        let x = project(&DVector::from_column_slice(start), &bounds);
        let evaluation = budget.first(&x)?;
        let mut best = Vertex {
            x,
            value: evaluation.objective,
            evaluation,
        };
        let mut rho = INITIAL_QUADRATIC_PENALTY;
        let mut iterations = 0;
        let mut converged = false;

        for round in 0..MAX_PENALTY_ROUNDS {
            let penalized = |e: &Evaluation| {
                let squared: f64 = e
                    .constraints
                    .iter()
                    .zip(&constraint_bounds)
                    .map(|(&g, &(lower, upper))| violation(g, lower, upper).powi(2))
                    .sum();
                e.objective + rho * squared
            };
            best.value = penalized(&best.evaluation);
            let mut stalled = false;
            while budget.used < budget.limit {
                let previous = best.value;
                let (vertex, steps) =
                    Self::search(&mut budget, best, &bounds, settings, cancel, &penalized)?;
                best = vertex;
                iterations += steps;
                if previous - best.value <= settings.tolerance * (1.0 + best.value.abs()) {
                    stalled = true;
                    break;
                }
            }

            let violation = max_violation(&best.evaluation.constraints, &constraint_bounds);
            log::debug!(
                "nelder-mead round {}: objective {:e}, violation {:e}, penalty {:e}",
                round + 1,
                best.evaluation.objective,
                violation,
                rho
            );
            if violation <= settings.feasibility_tolerance {
                converged = stalled;
                break;
            }
            if budget.used >= budget.limit || rho >= MAX_QUADRATIC_PENALTY {
                break;
            }
            rho = (rho * 10.0).min(MAX_QUADRATIC_PENALTY);
        }

        Ok(OptimizerOutcome {
            x: best.x.iter().copied().collect(),
            evaluation: best.evaluation,
            iterations,
            evaluations: budget.used,
            converged,
        })
    }
}
