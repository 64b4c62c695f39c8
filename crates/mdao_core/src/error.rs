//! Error taxonomy for model assembly, equation evaluation and solving.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems detected while building a model graph. No solver runs once one of
/// these has been raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssemblyError {
    #[error("variable '{0}' is declared more than once")]
    DuplicateVariable(String),

    #[error("unknown variable '{name}' referenced by '{referenced_by}'")]
    UnknownVariable { name: String, referenced_by: String },

    #[error("malformed equation in '{component}': {source}")]
    MalformedEquation {
        component: String,
        #[source]
        source: EvaluationError,
    },

    #[error("'{component}' promotes '{name}', which its equation does not use")]
    InvalidPromotion { component: String, name: String },

    #[error("variable '{name}' is computed by both '{first}' and '{second}'")]
    DuplicateOutput {
        name: String,
        first: String,
        second: String,
    },

    #[error("component name '{0}' is used more than once")]
    DuplicateComponent(String),

    #[error("'{target}' is connected to more than one source")]
    DuplicateConnection { target: String },

    #[error("model has no objective")]
    MissingObjective,

    #[error("design variable '{0}' must refer to an independent variable")]
    InvalidDesignVariable(String),

    #[error("invalid bounds for '{id}': lower {lower} exceeds upper {upper}")]
    InvalidBounds { id: String, lower: f64, upper: f64 },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Failures raised by the expression evaluator while compiling or running a
/// single equation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("'{target}' evaluated to a non-finite value ({value})")]
    NonFinite { target: String, value: f64 },

    #[error("expected {expected} binding(s), got {found}")]
    Binding { expected: usize, found: usize },
}

/// Raised when a coupling group stops at its iteration cap without meeting the
/// tolerance. Non-fatal unless the coupling policy says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceWarning {
    pub group: String,
    pub iterations: usize,
    pub metric: f64,
    pub tolerance: f64,
}

impl std::fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "group '{}' did not converge after {} sweep(s) (change {:e} > tolerance {:e})",
            self.group, self.iterations, self.metric, self.tolerance
        )
    }
}

/// Top-level error returned by every engine operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("failed to evaluate '{equation}': {source}")]
    EquationEvaluation {
        equation: String,
        #[source]
        source: EvaluationError,
    },

    #[error("{0}")]
    Convergence(ConvergenceWarning),

    #[error("no feasible point found: {0}")]
    InfeasibleProblem(String),

    #[error("driver configuration error: {0}")]
    DriverConfiguration(String),

    #[error("solve cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convergence_warning_display_names_group_and_counts() {
        let warning = ConvergenceWarning {
            group: "cycle".to_string(),
            iterations: 10,
            metric: 1e-3,
            tolerance: 1e-8,
        };
        let message = EngineError::Convergence(warning).to_string();
        assert!(message.contains("cycle"), "got {message}");
        assert!(message.contains("10 sweep"), "got {message}");
    }

    #[test]
    fn assembly_errors_convert_into_engine_errors() {
        let err: EngineError = AssemblyError::DuplicateVariable("x".to_string()).into();
        assert!(matches!(err, EngineError::Assembly(_)));
        assert_eq!(err.to_string(), "variable 'x' is declared more than once");
    }
}
