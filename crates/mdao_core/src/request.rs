//! Request documents accepted by the engine and the two solve entry points.
//!
//! Field names follow the query schema the engine was built for, including
//! the `independantVariables` spelling, which is accepted as an alias.

use crate::assembly::{
    ComponentSpec, ConstraintSpec, DesignVariableSpec, GroupSpec, IndependentValue, ModelBuilder,
    ObjectiveSpec,
};
use crate::cancel::CancellationToken;
use crate::driver::{OptimizationReport, OptimizerKind};
use crate::equation_engine::BytecodeEvaluator;
use crate::error::{AssemblyError, ConvergenceWarning, EngineError};
use crate::model::{ModelGraph, ResultEntry, SolveSettings};
use crate::traits::ExpressionEvaluator;
use serde::{Deserialize, Serialize};

/// Scope holding the independents of a connected (`problem`) request.
pub const INDEPENDENT_SCOPE: &str = "indeps";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInput {
    #[serde(default)]
    pub id: Option<String>,
    pub optimizer: String,
    #[serde(default)]
    pub optimize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndependentVariableInput {
    pub id: String,
    pub value: IndependentValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignVariableInput {
    pub id: String,
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplicitComponentInput {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub equation: String,
}

impl ExplicitComponentInput {
    /// The component name, falling back to its id.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplicitDisciplineInput {
    #[serde(default)]
    pub id: String,
    pub component: ExplicitComponentInput,
    #[serde(default)]
    pub promotes_inputs: Vec<String>,
    #[serde(default)]
    pub promotes_outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInput {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub explicit_disciplines: Vec<ExplicitDisciplineInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintInput {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
    #[serde(default)]
    pub equation: Option<String>,
    #[serde(default)]
    pub promotes: Vec<String>,
}

impl ConstraintInput {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveInput {
    pub id: String,
    #[serde(default)]
    pub equation: Option<String>,
    #[serde(default)]
    pub promotes: Vec<String>,
}

/// Independents, one coupled group, constraints and an objective, wired by
/// promotion. Evaluates once unless the driver asks to optimize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiDisciplineRequest {
    #[serde(default)]
    pub driver: Option<DriverInput>,
    #[serde(alias = "independantVariables")]
    pub independent_variables: Vec<IndependentVariableInput>,
    #[serde(default)]
    pub design_variables: Vec<DesignVariableInput>,
    #[serde(default)]
    pub group: Option<GroupInput>,
    #[serde(default)]
    pub constraints: Vec<ConstraintInput>,
    pub objective: ObjectiveInput,
    #[serde(default)]
    pub settings: SolveSettings,
}

/// A single explicit component wired to its independents by connections.
/// Always optimizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemRequest {
    pub driver: DriverInput,
    #[serde(alias = "independantVariables")]
    pub independent_variables: Vec<IndependentVariableInput>,
    #[serde(default)]
    pub design_variables: Vec<DesignVariableInput>,
    pub explicit_component: ExplicitComponentInput,
    #[serde(default)]
    pub constraints: Vec<ConstraintInput>,
    pub objective: ObjectiveInput,
    #[serde(default)]
    pub settings: SolveSettings,
}

/// What a solve hands back: the ordered result list plus diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveOutcome {
    pub results: Vec<ResultEntry>,
    pub warnings: Vec<ConvergenceWarning>,
    pub report: Option<OptimizationReport>,
}

impl MultiDisciplineRequest {
    /// The optimizer to run, or `None` for evaluate-only.
    pub fn optimizer(&self) -> Result<Option<OptimizerKind>, EngineError> {
        match &self.driver {
            Some(driver) if driver.optimize => OptimizerKind::from_name(&driver.optimizer).map(Some),
            _ => Ok(None),
        }
    }

    pub fn build(&self, evaluator: &dyn ExpressionEvaluator) -> Result<ModelGraph, AssemblyError> {
        let mut builder = ModelBuilder::new(evaluator).settings(self.settings);
        for independent in &self.independent_variables {
            builder = builder.independent(independent.id.clone(), independent.value.clone());
        }

        if let Some(group) = &self.group {
            let components = group
                .explicit_disciplines
                .iter()
                .map(|discipline| {
                    ComponentSpec::new(discipline.component.name(), discipline.component.equation.clone())
                        .promotes_inputs(discipline.promotes_inputs.iter().cloned())
                        .promotes_outputs(discipline.promotes_outputs.iter().cloned())
                })
                .collect();
            let name = group.name.as_deref().unwrap_or(&group.id);
            builder = builder.group(GroupSpec::new(name, components));
        }

        builder = builder.objective(match &self.objective.equation {
            Some(equation) => ObjectiveSpec::with_component(
                self.objective.id.clone(),
                ComponentSpec::new(self.objective.id.clone(), equation.clone())
                    .promotes(self.objective.promotes.iter().cloned()),
            ),
            None => ObjectiveSpec::reference(self.objective.id.clone()),
        });

        for constraint in &self.constraints {
            let spec = match &constraint.equation {
                Some(equation) => ConstraintSpec::with_component(
                    constraint.id.clone(),
                    constraint.name(),
                    ComponentSpec::new(constraint.name(), equation.clone())
                        .promotes(constraint.promotes.iter().cloned()),
                ),
                None => ConstraintSpec::reference(constraint.id.clone(), constraint.name()),
            };
            builder = builder.constraint(spec.bounds(constraint.lower_bound, constraint.upper_bound));
        }

        for design in &self.design_variables {
            builder = builder.design_variable(DesignVariableSpec::new(
                design.id.clone(),
                design.lower_bound,
                design.upper_bound,
            ));
        }

        builder.build()
    }
}

impl ProblemRequest {
    pub fn build(&self, evaluator: &dyn ExpressionEvaluator) -> Result<ModelGraph, AssemblyError> {
        let component = self.explicit_component.name();
        let mut builder = ModelBuilder::new(evaluator)
            .settings(self.settings)
            .group(GroupSpec::new(
                component,
                vec![ComponentSpec::new(component, self.explicit_component.equation.clone())],
            ));

        let mut readers = vec![component.to_string()];

        builder = builder.objective(match &self.objective.equation {
            Some(equation) => {
                readers.push(self.objective.id.clone());
                ObjectiveSpec::with_component(
                    self.objective.id.clone(),
                    ComponentSpec::new(self.objective.id.clone(), equation.clone()),
                )
            }
            None => ObjectiveSpec::reference(scoped(&self.objective.id, component)),
        });

        for constraint in &self.constraints {
            let name = constraint.name();
            let id = scoped(&constraint.id, name);
            let spec = match &constraint.equation {
                Some(equation) => {
                    readers.push(name.to_string());
                    ConstraintSpec::with_component(id, name, ComponentSpec::new(name, equation.clone()))
                }
                None => ConstraintSpec::reference(id, name),
            };
            builder = builder.constraint(spec.bounds(constraint.lower_bound, constraint.upper_bound));
        }

        for independent in &self.independent_variables {
            let source = scoped(&independent.id, INDEPENDENT_SCOPE);
            builder = builder.independent(source.clone(), independent.value.clone());
            for reader in &readers {
                builder = builder.connect_if_read(&source, format!("{reader}.{}", independent.id));
            }
        }

        for design in &self.design_variables {
            builder = builder.design_variable(
                DesignVariableSpec::new(
                    scoped(&design.id, INDEPENDENT_SCOPE),
                    design.lower_bound,
                    design.upper_bound,
                )
                .labelled(design.id.clone()),
            );
        }

        builder.build()
    }
}

/// `x` -> `scope.x`; ids that already carry a scope are kept.
fn scoped(id: &str, scope: &str) -> String {
    if id.contains('.') {
        id.to_string()
    } else {
        format!("{scope}.{id}")
    }
}

fn finish(
    model: &ModelGraph,
    results: Vec<ResultEntry>,
    report: Option<OptimizationReport>,
) -> SolveOutcome {
    SolveOutcome {
        results,
        warnings: model.warnings().to_vec(),
        report,
    }
}

/// Runs `model` once, or through `optimizer` when one is given.
pub fn solve_model(
    model: &mut ModelGraph,
    optimizer: Option<OptimizerKind>,
    cancel: &CancellationToken,
) -> Result<SolveOutcome, EngineError> {
    match optimizer {
        None => {
            let results = model.run_model(cancel)?;
            Ok(finish(model, results, None))
        }
        Some(kind) => {
            let (results, report) = model.optimize(kind.optimizer().as_ref(), cancel)?;
            Ok(finish(model, results, Some(report)))
        }
    }
}

pub fn solve_multi_discipline(
    request: &MultiDisciplineRequest,
    cancel: &CancellationToken,
) -> Result<SolveOutcome, EngineError> {
    let optimizer = request.optimizer()?;
    let mut model = request.build(&BytecodeEvaluator)?;
    solve_model(&mut model, optimizer, cancel)
}

pub fn solve_problem(
    request: &ProblemRequest,
    cancel: &CancellationToken,
) -> Result<SolveOutcome, EngineError> {
    let optimizer = OptimizerKind::from_name(&request.driver.optimizer)?;
    let mut model = request.build(&BytecodeEvaluator)?;
    solve_model(&mut model, Some(optimizer), cancel)
}
