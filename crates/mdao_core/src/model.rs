//! The assembled model graph and its evaluate-once mode.

use crate::cancel::CancellationToken;
use crate::coupling::{CouplingReport, CouplingSettings, DisciplineGroup, NonlinearBlockGaussSeidel};
use crate::driver::DriverSettings;
use crate::equation::EquationNode;
use crate::error::{AssemblyError, ConvergenceWarning, EngineError};
use crate::registry::{VarId, VariableRegistry, VariableRole};
use serde::{Deserialize, Serialize};

/// Every solver knob of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveSettings {
    pub coupling: CouplingSettings,
    pub driver: DriverSettings,
}

impl SolveSettings {
    pub fn validate(&self) -> Result<(), AssemblyError> {
        self.coupling.validate()?;
        self.driver.validate()
    }
}

/// One `{id, value}` pair of a solve result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub id: String,
    pub value: f64,
}

impl ResultEntry {
    pub fn new(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolvePhase {
    Assembling,
    Converging,
    EvaluateOnlyDone,
    Optimizing,
    Converged,
    OptimizingFailed,
    /// Evaluate-only solve that stopped with an error.
    ConvergingFailed,
}

#[derive(Debug)]
pub(crate) struct Objective {
    pub(crate) id: String,
    pub(crate) node: Option<EquationNode>,
    pub(crate) output: VarId,
}

#[derive(Debug)]
pub(crate) struct Constraint {
    pub(crate) name: String,
    pub(crate) node: Option<EquationNode>,
    pub(crate) output: VarId,
    pub(crate) lower: Option<f64>,
    pub(crate) upper: Option<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct DesignVariable {
    pub(crate) label: String,
    pub(crate) var: VarId,
}

/// A fully resolved model: registry, coupling groups, constraints and one
/// objective. Built by [`ModelBuilder`](crate::assembly::ModelBuilder) and
/// exclusively owned by the request that created it.
#[derive(Debug)]
pub struct ModelGraph {
    pub(crate) registry: VariableRegistry,
    pub(crate) independents: Vec<(VarId, f64)>,
    pub(crate) groups: Vec<DisciplineGroup>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) objective: Objective,
    pub(crate) design_variables: Vec<DesignVariable>,
    pub(crate) settings: SolveSettings,
    phase: SolvePhase,
    warnings: Vec<ConvergenceWarning>,
    reports: Vec<CouplingReport>,
}

impl ModelGraph {
    pub(crate) fn new(
        registry: VariableRegistry,
        independents: Vec<(VarId, f64)>,
        groups: Vec<DisciplineGroup>,
        constraints: Vec<Constraint>,
        objective: Objective,
        design_variables: Vec<DesignVariable>,
        settings: SolveSettings,
    ) -> Self {
        Self {
            registry,
            independents,
            groups,
            constraints,
            objective,
            design_variables,
            settings,
            phase: SolvePhase::Assembling,
            warnings: Vec::new(),
            reports: Vec::new(),
        }
    }

    pub fn phase(&self) -> SolvePhase {
        self.phase
    }

    pub(crate) fn transition(&mut self, phase: SolvePhase) {
        log::info!("solve phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn settings(&self) -> &SolveSettings {
        &self.settings
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn groups(&self) -> &[DisciplineGroup] {
        &self.groups
    }

    /// Non-fatal convergence warnings raised by the most recent solve.
    pub fn warnings(&self) -> &[ConvergenceWarning] {
        &self.warnings
    }

    /// Per-group coupling reports of the most recent solve.
    pub fn reports(&self) -> &[CouplingReport] {
        &self.reports
    }

    pub fn objective_id(&self) -> &str {
        &self.objective.id
    }

    pub fn value(&self, id: &str) -> Result<f64, AssemblyError> {
        self.registry.get(id)
    }

    /// Changes the initial value of an independent variable. The new value is
    /// used by every later `run_model` and `optimize`.
    pub fn set_value(&mut self, id: &str, value: f64) -> Result<(), AssemblyError> {
        let var = self
            .registry
            .index_of(id)
            .filter(|&var| self.registry.variable(var).role == VariableRole::Independent)
            .ok_or_else(|| AssemblyError::UnknownVariable {
                name: id.to_string(),
                referenced_by: "independent variables".to_string(),
            })?;
        for slot in self.independents.iter_mut().filter(|(v, _)| *v == var) {
            slot.1 = value;
        }
        self.registry.set_at(var, value);
        Ok(())
    }

    pub fn objective_value(&self) -> f64 {
        self.registry.value_at(self.objective.output)
    }

    /// Current value of every constraint, keyed by constraint name.
    pub fn constraint_values(&self) -> Vec<(String, f64)> {
        self.constraints
            .iter()
            .map(|c| (c.name.clone(), self.registry.value_at(c.output)))
            .collect()
    }

    pub(crate) fn restore_independents(&mut self) {
        for &(var, value) in &self.independents {
            self.registry.set_at(var, value);
        }
    }

    /// Converges every group in declaration order, then evaluates the
    /// objective and every constraint once.
    pub fn converge(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        self.warnings.clear();
        self.reports.clear();

        for group in &self.groups {
            let report = NonlinearBlockGaussSeidel::solve(
                group,
                &mut self.registry,
                &self.settings.coupling,
                cancel,
            )?;
            if let Some(warning) = &report.warning {
                self.warnings.push(warning.clone());
            }
            self.reports.push(report);
        }

        if let Some(node) = &self.objective.node {
            node.evaluate(&mut self.registry)?;
        }
        for constraint in &self.constraints {
            if let Some(node) = &constraint.node {
                node.evaluate(&mut self.registry)?;
            }
        }
        Ok(())
    }

    /// Evaluate-once mode. Returns the objective, then every promoted group
    /// output, then every constraint.
    pub fn run_model(&mut self, cancel: &CancellationToken) -> Result<Vec<ResultEntry>, EngineError> {
        self.restore_independents();
        self.transition(SolvePhase::Converging);
        if let Err(err) = self.converge(cancel) {
            self.transition(SolvePhase::ConvergingFailed);
            return Err(err);
        }
        self.transition(SolvePhase::EvaluateOnlyDone);

        let mut results = vec![ResultEntry::new(
            self.objective.id.clone(),
            self.objective_value(),
        )];
        for group in &self.groups {
            for name in group.promoted_outputs() {
                results.push(ResultEntry::new(name.clone(), self.registry.get(name)?));
            }
        }
        results.extend(
            self.constraint_values()
                .into_iter()
                .map(|(name, value)| ResultEntry::new(name, value)),
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{ComponentSpec, ConstraintSpec, GroupSpec, IndependentValue, ModelBuilder, ObjectiveSpec};
    use crate::equation_engine::BytecodeEvaluator;

    fn sellar(x1: f64, z1: f64, z2: f64) -> ModelGraph {
        ModelBuilder::new(&BytecodeEvaluator)
            .independent("x1", IndependentValue::Scalar(x1))
            .independent("z1", IndependentValue::Scalar(z1))
            .independent("z2", IndependentValue::Scalar(z2))
            .group(GroupSpec::new(
                "cycle",
                vec![
                    ComponentSpec::new("d1", "y1 = z1**2 + z2 + x1 - 0.2*y2")
                        .promotes_inputs(["x1", "z1", "z2", "y2"])
                        .promotes_outputs(["y1"]),
                    ComponentSpec::new("d2", "y2 = sqrt(abs(y1)) + z1 + z2")
                        .promotes_inputs(["z1", "z2", "y1"])
                        .promotes_outputs(["y2"]),
                ],
            ))
            .objective(ObjectiveSpec::with_component(
                "obj",
                ComponentSpec::new("obj", "obj = x1**2 + z2 + y1 + exp(-y2)").promotes(["*"]),
            ))
            .constraint(ConstraintSpec::with_component(
                "con1",
                "con1",
                ComponentSpec::new("con1", "con1 = 3.16 - y1").promotes(["*"]),
            ))
            .constraint(ConstraintSpec::with_component(
                "con2",
                "con2",
                ComponentSpec::new("con2", "con2 = y2 - 24.0").promotes(["*"]),
            ))
            .build()
            .expect("sellar model should assemble")
    }

    fn ids(results: &[ResultEntry]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn model_graph_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ModelGraph>();
    }

    #[test]
    fn sellar_evaluate_only_converges() {
        let mut model = sellar(1.0, 5.0, 2.0);
        assert_eq!(model.phase(), SolvePhase::Assembling);
        let results = model.run_model(&CancellationToken::new()).unwrap();

        assert_eq!(model.phase(), SolvePhase::EvaluateOnlyDone);
        assert_eq!(ids(&results), vec!["obj", "y1", "y2", "con1", "con2"]);
        assert!(results.iter().all(|r| r.value.is_finite()));
        assert!(model.warnings().is_empty());
        assert!(model.reports()[0].converged);

        let y1 = model.value("y1").unwrap();
        let y2 = model.value("y2").unwrap();
        assert!((y1 - 25.588).abs() < 1e-2, "y1 = {y1}");
        assert!((y2 - 12.058).abs() < 1e-2, "y2 = {y2}");
        // Fixed point holds to the coupling tolerance.
        assert!((y1 - (25.0 + 2.0 + 1.0 - 0.2 * y2)).abs() < 1e-6);
        assert!((results[3].value - (3.16 - y1)).abs() < 1e-12);
        assert!((results[4].value - (y2 - 24.0)).abs() < 1e-12);
    }

    #[test]
    fn run_model_is_deterministic() {
        let first = sellar(1.0, 5.0, 2.0).run_model(&CancellationToken::new()).unwrap();
        let second = sellar(1.0, 5.0, 2.0).run_model(&CancellationToken::new()).unwrap();
        assert_eq!(first, second);

        let mut model = sellar(1.0, 5.0, 2.0);
        let again = model.run_model(&CancellationToken::new()).unwrap();
        let repeat = model.run_model(&CancellationToken::new()).unwrap();
        assert!(again
            .iter()
            .zip(&repeat)
            .all(|(a, b)| a.id == b.id && (a.value - b.value).abs() < 1e-8));
    }

    #[test]
    fn reassembling_from_results_is_idempotent() {
        let mut model = sellar(1.0, 5.0, 2.0);
        let first = model.run_model(&CancellationToken::new()).unwrap();
        let x1 = model.value("x1").unwrap();
        let z1 = model.value("z1").unwrap();
        let z2 = model.value("z2").unwrap();

        let mut rebuilt = sellar(x1, z1, z2);
        let second = rebuilt.run_model(&CancellationToken::new()).unwrap();
        assert_eq!(ids(&first), ids(&second));
        for (a, b) in first.iter().zip(&second) {
            assert!((a.value - b.value).abs() < 1e-8, "{} drifted", a.id);
        }
    }

    #[test]
    fn set_value_changes_the_initial_independent() {
        let mut model = sellar(1.0, 5.0, 2.0);
        let before = model.run_model(&CancellationToken::new()).unwrap();
        model.set_value("x1", 2.0).unwrap();
        let after = model.run_model(&CancellationToken::new()).unwrap();
        assert_eq!(model.value("x1").unwrap(), 2.0);
        assert!(after[0].value > before[0].value);

        assert!(matches!(
            model.set_value("y1", 0.0),
            Err(AssemblyError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn cancelled_run_reports_cancellation() {
        let mut model = sellar(1.0, 5.0, 2.0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(model.run_model(&cancel), Err(EngineError::Cancelled));
        assert_eq!(model.phase(), SolvePhase::ConvergingFailed);

        let results = model.run_model(&CancellationToken::new()).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(model.phase(), SolvePhase::EvaluateOnlyDone);
    }

    #[test]
    fn unknown_variable_fails_before_any_sweep() {
        let err = ModelBuilder::new(&BytecodeEvaluator)
            .independent("x", IndependentValue::Scalar(1.0))
            .group(GroupSpec::new(
                "cycle",
                vec![ComponentSpec::new("d1", "y = x + w")
                    .promotes_inputs(["x", "w"])
                    .promotes_outputs(["y"])],
            ))
            .objective(ObjectiveSpec::with_component(
                "obj",
                ComponentSpec::new("obj", "obj = y").promotes(["*"]),
            ))
            .build()
            .expect_err("w is never declared");
        assert_eq!(
            err,
            AssemblyError::UnknownVariable {
                name: "w".to_string(),
                referenced_by: "d1".to_string()
            }
        );
    }
}
