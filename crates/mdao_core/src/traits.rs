use crate::cancel::CancellationToken;
use crate::driver::DriverSettings;
use crate::error::{EngineError, EvaluationError};
use std::fmt::Debug;

/// An equation compiled by an [`ExpressionEvaluator`], ready to be evaluated
/// repeatedly against fresh bindings.
pub trait CompiledExpression: Debug + Send + Sync {
    /// Symbols read by the equation, in the order `evaluate` expects bindings.
    fn inputs(&self) -> &[String];

    /// Symbols assigned by the equation, in the order `evaluate` writes them.
    fn outputs(&self) -> &[String];

    /// Evaluates the equation.
    /// bindings: one value per entry of `inputs()`
    /// out: buffer receiving one value per entry of `outputs()`
    fn evaluate(&self, bindings: &[f64], out: &mut [f64]) -> Result<(), EvaluationError>;
}

/// Turns equation text into a [`CompiledExpression`].
pub trait ExpressionEvaluator {
    fn compile(&self, text: &str) -> Result<Box<dyn CompiledExpression>, EvaluationError>;
}

/// Objective and constraint values observed at one design point.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub objective: f64,
    pub constraints: Vec<f64>,
}

/// A bounded, constrained minimization problem as seen by an [`Optimizer`].
pub trait OptimizationProblem {
    /// Number of design variables.
    fn dimension(&self) -> usize;

    /// Inclusive (lower, upper) bounds per design variable. Unbounded sides are infinite.
    fn bounds(&self) -> &[(f64, f64)];

    /// Inclusive (lower, upper) bounds per constraint value.
    fn constraint_bounds(&self) -> &[(f64, f64)];

    /// Evaluates objective and constraints at `x`.
    fn evaluate(&mut self, x: &[f64]) -> Result<Evaluation, EngineError>;
}

/// Final state reported by an [`Optimizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    pub x: Vec<f64>,
    pub evaluation: Evaluation,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// A pluggable minimization algorithm.
pub trait Optimizer {
    fn name(&self) -> &'static str;

    fn minimize(
        &self,
        problem: &mut dyn OptimizationProblem,
        start: &[f64],
        settings: &DriverSettings,
        cancel: &CancellationToken,
    ) -> Result<OptimizerOutcome, EngineError>;
}
