//! Discipline groups and the nonlinear block Gauss-Seidel coupling solver.

use crate::cancel::CancellationToken;
use crate::equation::EquationNode;
use crate::error::{AssemblyError, ConvergenceWarning, EngineError};
use crate::registry::{VarId, VariableRegistry};
use serde::{Deserialize, Serialize};

/// What happens when a group exhausts its sweep budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergencePolicy {
    /// Keep the last iterate and record a [`ConvergenceWarning`].
    #[default]
    Warn,
    /// Abort the solve with [`EngineError::Convergence`].
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub policy: ConvergencePolicy,
}

impl Default for CouplingSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
            policy: ConvergencePolicy::Warn,
        }
    }
}

impl CouplingSettings {
    pub fn validate(&self) -> Result<(), AssemblyError> {
        if self.max_iterations == 0 {
            return Err(AssemblyError::InvalidSettings(
                "coupling max_iterations must be greater than zero".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(AssemblyError::InvalidSettings(
                "coupling tolerance must be positive and finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// An ordered set of mutually coupled equation nodes.
///
/// Order matters: a sweep evaluates nodes front to back, and each node sees
/// the outputs its predecessors wrote earlier in the same sweep.
#[derive(Debug, Default)]
pub struct DisciplineGroup {
    id: String,
    nodes: Vec<EquationNode>,
    promoted_inputs: Vec<String>,
    promoted_outputs: Vec<String>,
}

impl DisciplineGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nodes(&self) -> &[EquationNode] {
        &self.nodes
    }

    pub fn push(&mut self, node: EquationNode) {
        self.nodes.push(node);
    }

    pub fn promote_input(&mut self, name: &str) {
        if !self.promoted_inputs.iter().any(|n| n == name) {
            self.promoted_inputs.push(name.to_string());
        }
    }

    pub fn promote_output(&mut self, name: &str) {
        if !self.promoted_outputs.iter().any(|n| n == name) {
            self.promoted_outputs.push(name.to_string());
        }
    }

    pub fn promoted_inputs(&self) -> &[String] {
        &self.promoted_inputs
    }

    /// Promoted output names in the order their components were declared.
    pub fn promoted_outputs(&self) -> &[String] {
        &self.promoted_outputs
    }

    /// Every variable written by a node of this group.
    pub fn coupling_variables(&self) -> Vec<VarId> {
        self.nodes
            .iter()
            .flat_map(|node| node.outputs().iter().copied())
            .collect()
    }
}

/// Outcome of one coupling solve.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingReport {
    pub group: String,
    pub iterations: usize,
    pub converged: bool,
    /// Convergence metric after each sweep.
    pub history: Vec<f64>,
    pub warning: Option<ConvergenceWarning>,
}

/// Fixed-point iteration that re-evaluates a group's nodes in order until the
/// largest change of any coupling variable across a sweep drops below the
/// tolerance.
pub struct NonlinearBlockGaussSeidel;

impl NonlinearBlockGaussSeidel {
    /// Iterates starting from whatever values the registry currently holds.
    pub fn solve(
        group: &DisciplineGroup,
        registry: &mut VariableRegistry,
        settings: &CouplingSettings,
        cancel: &CancellationToken,
    ) -> Result<CouplingReport, EngineError> {
        settings.validate()?;

        let coupling = group.coupling_variables();
        let mut previous: Vec<f64> = coupling.iter().map(|&var| registry.value_at(var)).collect();
        let mut history = Vec::new();

        for sweep in 1..=settings.max_iterations {
            cancel.check()?;

            for node in group.nodes() {
                node.evaluate(registry)?;
            }

            let mut metric = 0.0_f64;
            for (slot, &var) in previous.iter_mut().zip(&coupling) {
                let current = registry.value_at(var);
                metric = metric.max((current - *slot).abs());
                *slot = current;
            }
            history.push(metric);
            log::debug!("group '{}' sweep {}: max change {:e}", group.id(), sweep, metric);

            if metric < settings.tolerance {
                return Ok(CouplingReport {
                    group: group.id().to_string(),
                    iterations: sweep,
                    converged: true,
                    history,
                    warning: None,
                });
            }
        }

        let warning = ConvergenceWarning {
            group: group.id().to_string(),
            iterations: settings.max_iterations,
            metric: history.last().copied().unwrap_or(0.0),
            tolerance: settings.tolerance,
        };
        match settings.policy {
            ConvergencePolicy::Fail => Err(EngineError::Convergence(warning)),
            ConvergencePolicy::Warn => {
                log::warn!("{warning}");
                Ok(CouplingReport {
                    group: group.id().to_string(),
                    iterations: settings.max_iterations,
                    converged: false,
                    history,
                    warning: Some(warning),
                })
            }
        }
    }
}
