//! Derivative-free trust-region optimizer in the style of COBYLA.
//!
//! Objective and constraints are modelled by linear interpolation over a
//! simplex of `n + 1` samples. Each step solves a linear program inside a box
//! trust region, and progress is measured with an exact L-infinity merit
//! function whose penalty only ever grows.

use crate::cancel::CancellationToken;
use crate::driver::{inequalities, project, Budget, DriverSettings, Inequality};
use crate::error::EngineError;
use crate::traits::{Evaluation, OptimizationProblem, Optimizer, OptimizerOutcome};
use nalgebra::{DMatrix, DVector};

const INITIAL_RADIUS_SCALE: f64 = 0.1;
/// A vertex further than this many radii from the best one is replaced.
const FAR_VERTEX: f64 = 2.1;
/// A vertex closer than this many radii to the opposite face is replaced.
const THIN_VERTEX: f64 = 0.25;
const SHORT_STEP: f64 = 0.5;
const POOR_RATIO: f64 = 0.1;
const PENALTY_MARGIN: f64 = 1.5;

/// One interpolation point, in free coordinates.
struct Point {
    y: DVector<f64>,
    evaluation: Evaluation,
    /// Constraint sides written as `c(x) <= 0`.
    sides: DVector<f64>,
    violation: f64,
}

impl Point {
    fn merit(&self, penalty: f64) -> f64 {
        self.evaluation.objective + penalty * self.violation
    }
}

/// Maps free coordinates onto full design points and counts evaluations.
struct Sampler<'p> {
    budget: Budget<'p>,
    base: DVector<f64>,
    free: Vec<usize>,
    inequalities: Vec<Inequality>,
}

impl Sampler<'_> {
    fn full(&self, y: &DVector<f64>) -> DVector<f64> {
        let mut x = self.base.clone();
        for (k, &i) in self.free.iter().enumerate() {
            x[i] = y[k];
        }
        x
    }

    fn point(&self, y: DVector<f64>, evaluation: Evaluation) -> Point {
        let sides = DVector::from_iterator(
            self.inequalities.len(),
            self.inequalities.iter().map(|side| side.value(&evaluation)),
        );
        let violation = sides.iter().copied().fold(0.0, f64::max);
        Point {
            y,
            evaluation,
            sides,
            violation,
        }
    }

    /// `None` once the budget is spent.
    fn sample(&mut self, y: DVector<f64>) -> Result<Option<Point>, EngineError> {
        let Some(evaluation) = self.budget.evaluate(&self.full(&y))? else {
            return Ok(None);
        };
        Ok(Some(self.point(y, evaluation)))
    }

    fn finish(&self, point: Point, iterations: usize, converged: bool) -> OptimizerOutcome {
        OptimizerOutcome {
            x: self.full(&point.y).iter().copied().collect(),
            evaluation: point.evaluation,
            iterations,
            evaluations: self.budget.used,
            converged,
        }
    }
}

enum Shrink {
    Reduced,
    Final,
    Exhausted,
}

struct TrustRadius {
    current: f64,
    last: f64,
    reductions: usize,
    max_reductions: usize,
}

impl TrustRadius {
    fn shrink(&mut self) -> Shrink {
        self.reductions += 1;
        if self.current <= self.last {
            return Shrink::Final;
        }
        if self.reductions >= self.max_reductions {
            return Shrink::Exhausted;
        }
        self.current = (0.5 * self.current).max(self.last);
        log::debug!(
            "cobyla reduction {}: trust radius {:e}",
            self.reductions,
            self.current
        );
        Shrink::Reduced
    }
}

/// Step along coordinate `k` of length at most `radius`, taken towards the
/// side of the box with more room.
fn coordinate_step(x: &DVector<f64>, k: usize, radius: f64, lower: &[f64], upper: &[f64]) -> f64 {
    let up = radius.min(upper[k] - x[k]);
    let down = radius.min(x[k] - lower[k]);
    if up >= down {
        up
    } else {
        -down
    }
}

fn argmax(values: &[f64]) -> usize {
    (1..values.len()).fold(0, |best, i| if values[i] > values[best] { i } else { best })
}

fn argmin(values: &[f64]) -> usize {
    (1..values.len()).fold(0, |best, i| if values[i] < values[best] { i } else { best })
}

/// Lowest merit wins, then lowest violation; ties keep the earlier point.
fn best_index(points: &[Point], penalty: f64) -> usize {
    let mut best = 0;
    for (i, point) in points.iter().enumerate().skip(1) {
        let (merit, incumbent) = (point.merit(penalty), points[best].merit(penalty));
        if merit < incumbent || (merit == incumbent && point.violation < points[best].violation) {
            best = i;
        }
    }
    best
}

/// Minimizes the linear model `gradient . d` over the box
/// `-down <= d <= up`, keeping the linearized constraints no more violated
/// than the least violation the box allows.
fn trust_region_step(
    gradient: &DVector<f64>,
    jacobian: &DMatrix<f64>,
    sides: &DVector<f64>,
    up: &[f64],
    down: &[f64],
    violation: f64,
) -> DVector<f64> {
    let n = gradient.len();
    let m = sides.len();
    // Variables are d = p - q with p, q >= 0, plus a shared slack t for the
    // feasibility phase.
    let mut a = DMatrix::zeros(2 * n + m, 2 * n + 1);
    let mut b = vec![0.0; 2 * n + m];
    for k in 0..n {
        a[(2 * k, k)] = 1.0;
        b[2 * k] = up[k];
        a[(2 * k + 1, n + k)] = 1.0;
        b[2 * k + 1] = down[k];
    }
    for j in 0..m {
        for k in 0..n {
            a[(2 * n + j, k)] = jacobian[(j, k)];
            a[(2 * n + j, n + k)] = -jacobian[(j, k)];
        }
        a[(2 * n + j, 2 * n)] = -1.0;
        b[2 * n + j] = -sides[j];
    }

    let slack = if m > 0 {
        let mut cost = vec![0.0; 2 * n + 1];
        cost[2 * n] = 1.0;
        linear_program(&cost, &a, &b).map_or(violation, |z| z[2 * n])
    } else {
        0.0
    };

    let bounded = a.columns(0, 2 * n).into_owned();
    for j in 0..m {
        b[2 * n + j] = slack - sides[j] + 1e-12 * (1.0 + sides[j].abs());
    }
    let cost: Vec<f64> = gradient
        .iter()
        .copied()
        .chain(gradient.iter().map(|g| -g))
        .collect();
    match linear_program(&cost, &bounded, &b) {
        Some(z) => DVector::from_fn(n, |k, _| z[k] - z[n + k]),
        None => DVector::zeros(n),
    }
}

struct Tableau {
    rows: DMatrix<f64>,
    basis: Vec<usize>,
    allowed: Vec<bool>,
}

impl Tableau {
    fn rhs(&self, row: usize) -> f64 {
        self.rows[(row, self.rows.ncols() - 1)]
    }

    fn pivot(&mut self, row: usize, column: usize) {
        let width = self.rows.ncols();
        let scale = self.rows[(row, column)];
        for j in 0..width {
            self.rows[(row, j)] /= scale;
        }
        for i in 0..self.rows.nrows() {
            let factor = self.rows[(i, column)];
            if i != row && factor != 0.0 {
                for j in 0..width {
                    let v = self.rows[(row, j)];
                    self.rows[(i, j)] -= factor * v;
                }
            }
        }
        self.basis[row] = column;
    }

    /// Pivots to optimality for `cost`. `false` when unbounded or stuck.
    fn run(&mut self, cost: &[f64]) -> bool {
        let columns = self.allowed.len();
        let limit = 50 * (self.basis.len() + columns);
        for _ in 0..limit {
            let entering = (0..columns).find(|&j| {
                self.allowed[j] && !self.basis.contains(&j) && {
                    let reduced = cost[j]
                        - self
                            .basis
                            .iter()
                            .enumerate()
                            .map(|(i, &basic)| cost[basic] * self.rows[(i, j)])
                            .sum::<f64>();
                    reduced < -1e-10
                }
            });
            let Some(column) = entering else {
                return true;
            };

            let mut leaving: Option<(usize, f64)> = None;
            for i in 0..self.basis.len() {
                let coefficient = self.rows[(i, column)];
                if coefficient <= 1e-12 {
                    continue;
                }
                let ratio = self.rhs(i) / coefficient;
                let better = match leaving {
                    None => true,
                    Some((row, best)) => {
                        ratio < best - 1e-14
                            || ((ratio - best).abs() <= 1e-14 && self.basis[i] < self.basis[row])
                    }
                };
                if better {
                    leaving = Some((i, ratio));
                }
            }
            let Some((row, _)) = leaving else {
                return false;
            };
            self.pivot(row, column);
        }
        false
    }
}

/// Minimizes `cost . z` subject to `a z <= b` and `z >= 0` with a two-phase
/// tableau simplex under Bland's rule. `None` when infeasible or unbounded.
fn linear_program(cost: &[f64], a: &DMatrix<f64>, b: &[f64]) -> Option<DVector<f64>> {
    let (m, n) = a.shape();
    // Columns: variables, slacks, artificials, right-hand side.
    let columns = n + 2 * m;
    let mut tableau = Tableau {
        rows: DMatrix::zeros(m, columns + 1),
        basis: Vec::with_capacity(m),
        allowed: vec![true; columns],
    };
    for i in 0..m {
        let sign = if b[i] >= 0.0 { 1.0 } else { -1.0 };
        for j in 0..n {
            tableau.rows[(i, j)] = sign * a[(i, j)];
        }
        tableau.rows[(i, n + i)] = sign;
        if sign > 0.0 {
            tableau.basis.push(n + i);
        } else {
            tableau.rows[(i, n + m + i)] = 1.0;
            tableau.basis.push(n + m + i);
        }
        tableau.rows[(i, columns)] = sign * b[i];
    }

    let artificial = |column: usize| column >= n + m;
    if tableau.basis.iter().any(|&c| artificial(c)) {
        let mut phase_one = vec![0.0; columns];
        for c in phase_one.iter_mut().skip(n + m) {
            *c = 1.0;
        }
        tableau.run(&phase_one);
        let infeasibility: f64 = (0..m)
            .filter(|&i| artificial(tableau.basis[i]))
            .map(|i| tableau.rhs(i))
            .sum();
        if infeasibility > 1e-9 {
            return None;
        }
        for i in 0..m {
            if !artificial(tableau.basis[i]) {
                continue;
            }
            let replacement = (0..n + m)
                .find(|&j| !tableau.basis.contains(&j) && tableau.rows[(i, j)].abs() > 1e-10);
            if let Some(j) = replacement {
                tableau.pivot(i, j);
            }
        }
    }
    for allowed in tableau.allowed.iter_mut().skip(n + m) {
        *allowed = false;
    }

    let mut phase_two = vec![0.0; columns];
    phase_two[..n].copy_from_slice(cost);
    if !tableau.run(&phase_two) {
        return None;
    }
    let mut z = DVector::zeros(n);
    for (i, &basic) in tableau.basis.iter().enumerate() {
        if basic < n {
            z[basic] = tableau.rhs(i);
        }
    }
    Some(z)
}

/// Constrained optimization by linear approximations.
///
/// Coordinates whose bounds coincide are held fixed and left out of the
/// simplex. The trust radius starts at a tenth of the largest start
/// coordinate (at least 0.1) and halves whenever a step is short or
/// predicts poorly, until it reaches `100 * tolerance`.
/// `max_iterations` caps the number of reductions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cobyla;

impl Optimizer for Cobyla {
    fn name(&self) -> &'static str {
        "cobyla"
    }

    fn minimize(
        &self,
        problem: &mut dyn OptimizationProblem,
        start: &[f64],
        settings: &DriverSettings,
        cancel: &CancellationToken,
    ) -> Result<OptimizerOutcome, EngineError> {
        let bounds = problem.bounds().to_vec();
        let sides = inequalities(problem.constraint_bounds());
        let base = project(&DVector::from_column_slice(start), &bounds);
        let free: Vec<usize> = (0..bounds.len())
            .filter(|&i| bounds[i].0 < bounds[i].1)
            .collect();
        let free_bounds: Vec<(f64, f64)> = free.iter().map(|&i| bounds[i]).collect();
        let lower: Vec<f64> = free_bounds.iter().map(|b| b.0).collect();
        let upper: Vec<f64> = free_bounds.iter().map(|b| b.1).collect();
        let n = free.len();

        let mut sampler = Sampler {
            budget: Budget::new(problem, settings.max_evaluations),
            base,
            free,
            inequalities: sides,
        };
        let y0 = DVector::from_iterator(n, sampler.free.iter().map(|&i| sampler.base[i]));
        let evaluation = sampler.budget.first(&sampler.base)?;
        let first = sampler.point(y0.clone(), evaluation);
        if n == 0 {
            return Ok(sampler.finish(first, 0, true));
        }

        let initial = INITIAL_RADIUS_SCALE * y0.amax().max(1.0);
        let mut radius = TrustRadius {
            current: initial,
            last: (100.0 * settings.tolerance).min(initial),
            reductions: 0,
            max_reductions: settings.max_iterations,
        };

        let mut points = vec![first];
        for k in 0..n {
            let mut y = y0.clone();
            y[k] += coordinate_step(&y0, k, radius.current, &lower, &upper);
            match sampler.sample(y)? {
                Some(point) => points.push(point),
                None => return Ok(sampler.finish(points.swap_remove(0), 0, false)),
            }
        }

        let mut penalty = 0.0_f64;
        let mut converged = false;
        let mut repair = false;
        loop {
            cancel.check()?;
            let rho = radius.current;
            let best = best_index(&points, penalty);
            points.swap(0, best);
            let x0 = points[0].y.clone();

            let offsets = DMatrix::from_fn(n, n, |i, k| points[i + 1].y[k] - x0[k]);
            let Some(inverse) = offsets.clone().lu().try_inverse() else {
                log::debug!("cobyla simplex became singular");
                break;
            };
            let objective_change = DVector::from_fn(n, |i, _| {
                points[i + 1].evaluation.objective - points[0].evaluation.objective
            });
            let gradient = &inverse * objective_change;
            let m = points[0].sides.len();
            let side_change =
                DMatrix::from_fn(n, m, |i, j| points[i + 1].sides[j] - points[0].sides[j]);
            let jacobian = (&inverse * side_change).transpose();

            let distances: Vec<f64> = (0..n).map(|i| offsets.row(i).norm()).collect();
            let far = argmax(&distances);
            let bad = if distances[far] > FAR_VERTEX * rho {
                Some(far)
            } else {
                let heights: Vec<f64> = (0..n).map(|i| 1.0 / inverse.column(i).norm()).collect();
                let thin = argmin(&heights);
                (heights[thin] < THIN_VERTEX * rho).then_some(thin)
            };

            if let (true, Some(bad)) = (repair, bad) {
                repair = false;
                let weights: Vec<f64> = (0..n)
                    .map(|k| {
                        inverse[(k, bad)].abs() * coordinate_step(&x0, k, rho, &lower, &upper).abs()
                    })
                    .collect();
                let k = argmax(&weights);
                let mut y = x0.clone();
                y[k] += coordinate_step(&x0, k, rho, &lower, &upper);
                let Some(point) = sampler.sample(y)? else {
                    break;
                };
                points[bad + 1] = point;
                continue;
            }
            repair = false;

            let up: Vec<f64> = (0..n).map(|k| rho.min(upper[k] - x0[k])).collect();
            let down: Vec<f64> = (0..n).map(|k| rho.min(x0[k] - lower[k])).collect();
            let step = trust_region_step(
                &gradient,
                &jacobian,
                &points[0].sides,
                &up,
                &down,
                points[0].violation,
            );

            if step.amax() < SHORT_STEP * rho {
                if bad.is_some() {
                    repair = true;
                    continue;
                }
                match radius.shrink() {
                    Shrink::Reduced => continue,
                    Shrink::Final => {
                        converged = true;
                        break;
                    }
                    Shrink::Exhausted => break,
                }
            }

            let violation = points[0].violation;
            let linearized = &points[0].sides + &jacobian * &step;
            let predicted_violation = linearized.iter().copied().fold(0.0, f64::max);
            let descent = gradient.dot(&step);
            if predicted_violation < violation && descent > 0.0 {
                let needed = PENALTY_MARGIN * descent / (violation - predicted_violation);
                if needed > penalty {
                    penalty = needed;
                    if best_index(&points, penalty) != 0 {
                        continue;
                    }
                }
            }
            let predicted = penalty * (violation - predicted_violation) - descent;

            let y = project(&(&x0 + &step), &free_bounds);
            let Some(trial) = sampler.sample(y)? else {
                break;
            };
            let weights: Vec<f64> = (0..n)
                .map(|i| {
                    let spread = (&trial.y - &points[i + 1].y).norm() / rho;
                    step.dot(&inverse.column(i)).abs() * spread.max(1.0)
                })
                .collect();
            let replaced = argmax(&weights) + 1;

            let before = points[0].merit(penalty);
            let after = trial.merit(penalty);
            let ratio = if predicted > 0.0 {
                (before - after) / predicted
            } else {
                -1.0
            };
            if after < before || (after == before && trial.violation < violation) {
                let previous = std::mem::replace(&mut points[0], trial);
                points[replaced] = previous;
            } else {
                points[replaced] = trial;
            }

            if ratio <= POOR_RATIO {
                if bad.is_some() {
                    repair = true;
                    continue;
                }
                match radius.shrink() {
                    Shrink::Reduced => {}
                    Shrink::Final => {
                        converged = true;
                        break;
                    }
                    Shrink::Exhausted => break,
                }
            }
        }

        let best = best_index(&points, penalty);
        Ok(sampler.finish(points.swap_remove(best), radius.reductions, converged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `f = (x-3)^2 + x*y + (y+4)^2 - 3` with the single constraint `x + y`.
    struct Paraboloid {
        bounds: Vec<(f64, f64)>,
        constraint_bounds: Vec<(f64, f64)>,
    }

    impl Paraboloid {
        fn new(bounds: (f64, f64), constraint: Option<(f64, f64)>) -> Self {
            Self {
                bounds: vec![bounds; 2],
                constraint_bounds: constraint.into_iter().collect(),
            }
        }
    }

    impl OptimizationProblem for Paraboloid {
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
            let (a, b) = (x[0], x[1]);
            Ok(Evaluation {
                objective: (a - 3.0).powi(2) + a * b + (b + 4.0).powi(2) - 3.0,
                constraints: if self.constraint_bounds.is_empty() {
                    Vec::new()
                } else {
                    vec![a + b]
                },
            })
        }
    }

    fn minimize(problem: &mut Paraboloid, settings: DriverSettings) -> OptimizerOutcome {
        Cobyla
            .minimize(problem, &[2.0, 1.0], &settings, &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn linear_program_finds_the_vertex_optimum() {
        // max x + y s.t. x + 2y <= 4, 3x + y <= 6
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 1.0]);
        let z = linear_program(&[-1.0, -1.0], &a, &[4.0, 6.0]).unwrap();
        assert!((z[0] - 1.6).abs() < 1e-12, "{z}");
        assert!((z[1] - 1.2).abs() < 1e-12, "{z}");
    }

    #[test]
    fn linear_program_handles_lower_limits() {
        // min x s.t. x >= 2, x <= 5
        let a = DMatrix::from_row_slice(2, 1, &[-1.0, 1.0]);
        let z = linear_program(&[1.0], &a, &[-2.0, 5.0]).unwrap();
        assert!((z[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn linear_program_reports_infeasible_and_unbounded() {
        let a = DMatrix::from_row_slice(1, 1, &[1.0]);
        assert!(linear_program(&[1.0], &a, &[-1.0]).is_none());
        let a = DMatrix::from_row_slice(1, 1, &[-1.0]);
        assert!(linear_program(&[-1.0], &a, &[0.0]).is_none());
    }

    #[test]
    fn minimizes_unconstrained_paraboloid() {
        let mut problem = Paraboloid::new((-50.0, 50.0), None);
        let outcome = minimize(&mut problem, DriverSettings::default());
        let f = outcome.evaluation.objective;
        assert!((f + 82.0 / 3.0).abs() < 1e-4, "f = {f}");
        assert!((outcome.x[0] - 20.0 / 3.0).abs() < 1e-2);
        assert!((outcome.x[1] + 22.0 / 3.0).abs() < 1e-2);
        assert!(outcome.converged);
    }

    #[test]
    fn lands_on_an_active_constraint() {
        // x + y >= 2 moves the optimum to (8, -6) with f = -22.
        let mut problem = Paraboloid::new((-50.0, 50.0), Some((2.0, 10.0)));
        let outcome = minimize(&mut problem, DriverSettings::default());
        let sum = outcome.x[0] + outcome.x[1];
        assert!(sum >= 2.0 - 1e-6, "x + y = {sum}");
        assert!((outcome.evaluation.objective + 22.0).abs() < 1e-3);
        assert!(outcome.converged);
    }

    #[test]
    fn fixed_coordinates_stay_put() {
        // x = 1 leaves f = y + (y+4)^2 + 1, minimized at y = -4.5.
        let mut problem = Paraboloid::new((-50.0, 50.0), None);
        problem.bounds[0] = (1.0, 1.0);
        let outcome = minimize(&mut problem, DriverSettings::default());
        assert_eq!(outcome.x[0], 1.0);
        assert!((outcome.x[1] + 4.5).abs() < 1e-3, "y = {}", outcome.x[1]);
        assert!((outcome.evaluation.objective + 3.25).abs() < 1e-6);
    }

    #[test]
    fn collapsed_box_returns_the_start() {
        let mut problem = Paraboloid::new((-50.0, 50.0), None);
        problem.bounds = vec![(1.5, 1.5), (-0.5, -0.5)];
        let outcome = Cobyla
            .minimize(
                &mut problem,
                &[1.5, -0.5],
                &DriverSettings::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(outcome.x, vec![1.5, -0.5]);
        assert_eq!(outcome.evaluation.objective, 10.75);
        assert_eq!(outcome.evaluations, 1);
        assert!(outcome.converged);
    }

    #[test]
    fn evaluation_budget_is_respected() {
        let mut problem = Paraboloid::new((-50.0, 50.0), Some((-10.0, 10.0)));
        let settings = DriverSettings {
            max_evaluations: 5,
            ..DriverSettings::default()
        };
        let outcome = minimize(&mut problem, settings);
        assert_eq!(outcome.evaluations, 5);
        assert!(!outcome.converged);
        assert!(outcome.evaluation.objective < 25.0);
    }

    #[test]
    fn cancellation_is_observed() {
        let mut problem = Paraboloid::new((-50.0, 50.0), None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Cobyla.minimize(&mut problem, &[2.0, 1.0], &DriverSettings::default(), &cancel);
        assert_eq!(result, Err(EngineError::Cancelled));
    }
}
