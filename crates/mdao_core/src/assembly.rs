//! Symbol resolution: turns a declarative model description into a
//! [`ModelGraph`] with every equation bound to registry variables.
//!
//! Naming follows the promotion rules of the request format. A symbol that a
//! component promotes keeps its bare name and is shared with every other
//! component promoting the same name. An unpromoted symbol is local to its
//! component and named `component.symbol`; it can be wired to another
//! variable with an explicit connection.

use crate::coupling::DisciplineGroup;
use crate::equation::EquationNode;
use crate::error::{AssemblyError, EvaluationError};
use crate::model::{Constraint, DesignVariable, ModelGraph, Objective, SolveSettings};
use crate::registry::{element_id, VarId, Variable, VariableRegistry, VariableRole};
use crate::traits::{CompiledExpression, ExpressionEvaluator};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const WILDCARD: &str = "*";

/// Initial value of an independent: a scalar, or an array of element values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndependentValue {
    Scalar(f64),
    Array(Vec<f64>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentSpec {
    pub name: String,
    pub equation: String,
    pub promotes_inputs: Vec<String>,
    pub promotes_outputs: Vec<String>,
    /// Promoted as input or output, whichever the equation uses.
    pub promotes: Vec<String>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, equation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            equation: equation.into(),
            ..Self::default()
        }
    }

    pub fn promotes_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.promotes_inputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn promotes_outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.promotes_outputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn promotes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.promotes.extend(names.into_iter().map(Into::into));
        self
    }

    fn is_promoted(&self, symbol: &str, output: bool) -> bool {
        let base = base_name(symbol);
        let directed = if output {
            &self.promotes_outputs
        } else {
            &self.promotes_inputs
        };
        directed
            .iter()
            .chain(&self.promotes)
            .any(|name| name == WILDCARD || name == base)
    }

    fn resolve(&self, symbol: &str, output: bool) -> String {
        if self.is_promoted(symbol, output) {
            symbol.to_string()
        } else {
            format!("{}.{}", self.name, symbol)
        }
    }

    fn check_promotions(&self, compiled: &dyn CompiledExpression) -> Result<(), AssemblyError> {
        let uses = |symbols: &[String], name: &str| symbols.iter().any(|s| base_name(s) == name);
        let invalid = |name: &String| AssemblyError::InvalidPromotion {
            component: self.name.clone(),
            name: name.clone(),
        };
        for name in self.promotes_inputs.iter().filter(|n| n.as_str() != WILDCARD) {
            if !uses(compiled.inputs(), name.as_str()) {
                return Err(invalid(name));
            }
        }
        for name in self.promotes_outputs.iter().filter(|n| n.as_str() != WILDCARD) {
            if !uses(compiled.outputs(), name.as_str()) {
                return Err(invalid(name));
            }
        }
        for name in self.promotes.iter().filter(|n| n.as_str() != WILDCARD) {
            if !uses(compiled.inputs(), name.as_str()) && !uses(compiled.outputs(), name.as_str()) {
                return Err(invalid(name));
            }
        }
        Ok(())
    }
}

/// A named coupling group of components, solved together.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub name: String,
    pub components: Vec<ComponentSpec>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, components: Vec<ComponentSpec>) -> Self {
        Self {
            name: name.into(),
            components,
        }
    }
}

/// The objective: either its own component, or a reference to a variable
/// some other component computes.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveSpec {
    pub id: String,
    pub component: Option<ComponentSpec>,
}

impl ObjectiveSpec {
    pub fn reference(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component: None,
        }
    }

    pub fn with_component(id: impl Into<String>, component: ComponentSpec) -> Self {
        Self {
            id: id.into(),
            component: Some(component),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSpec {
    pub id: String,
    pub name: String,
    pub component: Option<ComponentSpec>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl ConstraintSpec {
    pub fn reference(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            component: None,
            lower: None,
            upper: None,
        }
    }

    pub fn with_component(
        id: impl Into<String>,
        name: impl Into<String>,
        component: ComponentSpec,
    ) -> Self {
        Self {
            component: Some(component),
            ..Self::reference(id, name)
        }
    }

    pub fn bounds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesignVariableSpec {
    /// Independent variable (scalar or array) the optimizer adjusts.
    pub id: String,
    /// Id reported in results.
    pub label: String,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl DesignVariableSpec {
    pub fn new(id: impl Into<String>, lower: Option<f64>, upper: Option<f64>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            lower,
            upper,
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Clone)]
struct Connection {
    source: String,
    target: String,
    required: bool,
}

#[derive(Clone, Copy)]
enum Slot {
    Group(usize),
    Objective,
    Constraint(usize),
}

struct Prepared<'a> {
    slot: Slot,
    spec: &'a ComponentSpec,
    compiled: Box<dyn CompiledExpression>,
    locals: Vec<String>,
    outputs: Vec<String>,
}

/// Collects a model description and resolves it in one pass.
pub struct ModelBuilder<'e> {
    evaluator: &'e dyn ExpressionEvaluator,
    independents: Vec<(String, IndependentValue)>,
    groups: Vec<GroupSpec>,
    constraints: Vec<ConstraintSpec>,
    objective: Option<ObjectiveSpec>,
    design_variables: Vec<DesignVariableSpec>,
    connections: Vec<Connection>,
    settings: SolveSettings,
}

impl<'e> ModelBuilder<'e> {
    pub fn new(evaluator: &'e dyn ExpressionEvaluator) -> Self {
        Self {
            evaluator,
            independents: Vec::new(),
            groups: Vec::new(),
            constraints: Vec::new(),
            objective: None,
            design_variables: Vec::new(),
            connections: Vec::new(),
            settings: SolveSettings::default(),
        }
    }

    pub fn independent(mut self, id: impl Into<String>, value: IndependentValue) -> Self {
        self.independents.push((id.into(), value));
        self
    }

    pub fn group(mut self, group: GroupSpec) -> Self {
        self.groups.push(group);
        self
    }

    pub fn constraint(mut self, constraint: ConstraintSpec) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn objective(mut self, objective: ObjectiveSpec) -> Self {
        self.objective = Some(objective);
        self
    }

    pub fn design_variable(mut self, design_variable: DesignVariableSpec) -> Self {
        self.design_variables.push(design_variable);
        self
    }

    /// Wires each target local input to `source`. Every target must be read by
    /// some component.
    pub fn connect<I, S>(mut self, source: &str, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for target in targets {
            self.connections.push(Connection {
                source: source.to_string(),
                target: target.into(),
                required: true,
            });
        }
        self
    }

    /// Like [`connect`](Self::connect), but silently skips a target that no
    /// component reads.
    pub fn connect_if_read(mut self, source: &str, target: impl Into<String>) -> Self {
        self.connections.push(Connection {
            source: source.to_string(),
            target: target.into(),
            required: false,
        });
        self
    }

    pub fn settings(mut self, settings: SolveSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<ModelGraph, AssemblyError> {
        self.settings.validate()?;

        let mut registry = VariableRegistry::new();
        let mut independents = Vec::new();
        for (id, value) in &self.independents {
            match value {
                IndependentValue::Scalar(v) => {
                    let var = registry.declare(Variable::independent(id.clone(), *v))?;
                    independents.push((var, *v));
                }
                IndependentValue::Array(values) => {
                    let vars = registry.declare_array(id, values, VariableRole::Independent)?;
                    independents.extend(vars.into_iter().zip(values.iter().copied()));
                }
            }
        }

        let objective = self.objective.as_ref().ok_or(AssemblyError::MissingObjective)?;

        let mut components: Vec<(Slot, &ComponentSpec)> = Vec::new();
        for (i, group) in self.groups.iter().enumerate() {
            components.extend(group.components.iter().map(|c| (Slot::Group(i), c)));
        }
        if let Some(component) = &objective.component {
            components.push((Slot::Objective, component));
        }
        for (i, constraint) in self.constraints.iter().enumerate() {
            if let Some(component) = &constraint.component {
                components.push((Slot::Constraint(i), component));
            }
        }

        let mut seen = HashSet::new();
        for (_, spec) in &components {
            if !seen.insert(spec.name.as_str()) {
                return Err(AssemblyError::DuplicateComponent(spec.name.clone()));
            }
        }

        let mut owners: HashMap<String, String> = HashMap::new();
        let mut prepared = Vec::with_capacity(components.len());
        for (slot, spec) in components {
            let compiled = self.evaluator.compile(&spec.equation).map_err(|source| {
                AssemblyError::MalformedEquation {
                    component: spec.name.clone(),
                    source,
                }
            })?;
            if compiled.outputs().is_empty() {
                return Err(AssemblyError::MalformedEquation {
                    component: spec.name.clone(),
                    source: EvaluationError::Parse("equation assigns no outputs".to_string()),
                });
            }
            spec.check_promotions(compiled.as_ref())?;

            let outputs: Vec<String> = compiled
                .outputs()
                .iter()
                .map(|symbol| spec.resolve(symbol, true))
                .collect();
            for name in &outputs {
                if registry.elements(name).is_some() {
                    let first = owners
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| "independent variables".to_string());
                    return Err(AssemblyError::DuplicateOutput {
                        name: name.clone(),
                        first,
                        second: spec.name.clone(),
                    });
                }
                registry.declare(Variable::output(name.clone()))?;
                owners.insert(name.clone(), spec.name.clone());
            }

            let locals = compiled
                .inputs()
                .iter()
                .map(|symbol| spec.resolve(symbol, false))
                .collect();
            prepared.push(Prepared {
                slot,
                spec,
                compiled,
                locals,
                outputs,
            });
        }

        let connected = resolve_connections(&self.connections, &prepared, &registry)?;
        let source_of = |local: &String| -> String {
            if let Some(source) = connected.get(local) {
                return source.clone();
            }
            if let Some((base, subscript)) = split_subscript(local) {
                if let Some(source) = connected.get(base) {
                    return format!("{source}{subscript}");
                }
            }
            local.clone()
        };

        let mut groups: Vec<DisciplineGroup> = self
            .groups
            .iter()
            .map(|g| DisciplineGroup::new(g.name.clone()))
            .collect();
        let mut objective_node = None;
        let mut constraint_nodes: Vec<Option<(EquationNode, VarId)>> =
            self.constraints.iter().map(|_| None).collect();

        for item in prepared {
            let inputs: Vec<String> = item.locals.iter().map(source_of).collect();
            let symbols = item.compiled.outputs().to_vec();
            let input_symbols = item.compiled.inputs().to_vec();
            let node = EquationNode::bind(
                item.spec.name.clone(),
                item.spec.equation.clone(),
                item.compiled,
                &inputs,
                &item.outputs,
                &registry,
            )?;
            match item.slot {
                Slot::Group(i) => {
                    let group = &mut groups[i];
                    for (symbol, resolved) in symbols.iter().zip(&item.outputs) {
                        if item.spec.is_promoted(symbol, true) {
                            group.promote_output(resolved);
                        }
                    }
                    for (local, symbol) in item.locals.iter().zip(&input_symbols) {
                        if item.spec.is_promoted(symbol, false) {
                            group.promote_input(local);
                        }
                    }
                    group.push(node);
                }
                Slot::Objective => {
                    let output = select_output(&node, &item.outputs, &symbols, &[objective.id.as_str()]);
                    objective_node = Some((node, output));
                }
                Slot::Constraint(i) => {
                    let constraint = &self.constraints[i];
                    let output = select_output(
                        &node,
                        &item.outputs,
                        &symbols,
                        &[constraint.id.as_str(), constraint.name.as_str()],
                    );
                    constraint_nodes[i] = Some((node, output));
                }
            }
        }

        let objective = match objective_node {
            Some((node, output)) => Objective {
                id: objective.id.clone(),
                node: Some(node),
                output,
            },
            None => Objective {
                id: objective.id.clone(),
                node: None,
                output: lookup(&registry, &objective.id, "objective")?,
            },
        };

        let mut constraints = Vec::with_capacity(self.constraints.len());
        for (spec, bound) in self.constraints.iter().zip(constraint_nodes) {
            check_bounds(&spec.name, spec.lower, spec.upper)?;
            let (node, output) = match bound {
                Some((node, output)) => (Some(node), output),
                None => (None, lookup(&registry, &spec.id, &spec.name)?),
            };
            constraints.push(Constraint {
                name: spec.name.clone(),
                node,
                output,
                lower: spec.lower,
                upper: spec.upper,
            });
        }

        let mut design_variables = Vec::new();
        let mut chosen = HashSet::new();
        for spec in &self.design_variables {
            check_bounds(&spec.id, spec.lower, spec.upper)?;
            let vars = registry
                .elements(&spec.id)
                .ok_or_else(|| AssemblyError::UnknownVariable {
                    name: spec.id.clone(),
                    referenced_by: "design variables".to_string(),
                })?;
            let scalar = registry.index_of(&spec.id).is_some();
            for (i, var) in vars.into_iter().enumerate() {
                if registry.variable(var).role != VariableRole::Independent {
                    return Err(AssemblyError::InvalidDesignVariable(spec.id.clone()));
                }
                if !chosen.insert(var) {
                    return Err(AssemblyError::DuplicateVariable(spec.id.clone()));
                }
                registry.set_bounds(var, spec.lower, spec.upper);
                let label = if scalar {
                    spec.label.clone()
                } else {
                    element_id(&spec.label, i)
                };
                design_variables.push(DesignVariable { label, var });
            }
        }

        log::debug!(
            "assembled model: {} variables, {} group(s), {} constraint(s), {} design variable(s)",
            registry.len(),
            groups.len(),
            constraints.len(),
            design_variables.len()
        );

        Ok(ModelGraph::new(
            registry,
            independents,
            groups,
            constraints,
            objective,
            design_variables,
            self.settings,
        ))
    }
}

fn resolve_connections(
    connections: &[Connection],
    prepared: &[Prepared<'_>],
    registry: &VariableRegistry,
) -> Result<HashMap<String, String>, AssemblyError> {
    let mut connected = HashMap::new();
    for connection in connections {
        if registry.elements(&connection.source).is_none() {
            return Err(AssemblyError::UnknownVariable {
                name: connection.source.clone(),
                referenced_by: format!("connection to '{}'", connection.target),
            });
        }
        let read = prepared.iter().any(|item| {
            item.locals
                .iter()
                .any(|local| local == &connection.target || base_name(local) == connection.target)
        });
        if !read {
            if connection.required {
                return Err(AssemblyError::UnknownVariable {
                    name: connection.target.clone(),
                    referenced_by: format!("connection from '{}'", connection.source),
                });
            }
            continue;
        }
        if connected
            .insert(connection.target.clone(), connection.source.clone())
            .is_some()
        {
            return Err(AssemblyError::DuplicateConnection {
                target: connection.target.clone(),
            });
        }
    }
    Ok(connected)
}

/// Picks the output named by one of `keys` (resolved name first, then bare
/// symbol), falling back to the first output.
fn select_output(node: &EquationNode, resolved: &[String], symbols: &[String], keys: &[&str]) -> VarId {
    keys.iter()
        .find_map(|key| {
            resolved
                .iter()
                .position(|name| name == key)
                .or_else(|| symbols.iter().position(|symbol| symbol == key))
        })
        .map(|pos| node.outputs()[pos])
        .unwrap_or(node.outputs()[0])
}

fn lookup(registry: &VariableRegistry, id: &str, referenced_by: &str) -> Result<VarId, AssemblyError> {
    registry
        .index_of(id)
        .ok_or_else(|| AssemblyError::UnknownVariable {
            name: id.to_string(),
            referenced_by: referenced_by.to_string(),
        })
}

fn check_bounds(id: &str, lower: Option<f64>, upper: Option<f64>) -> Result<(), AssemblyError> {
    match (lower, upper) {
        (Some(lower), Some(upper)) if lower > upper => Err(AssemblyError::InvalidBounds {
            id: id.to_string(),
            lower,
            upper,
        }),
        _ => Ok(()),
    }
}

/// `z[1]` -> `z`; anything else is returned unchanged.
fn base_name(symbol: &str) -> &str {
    split_subscript(symbol).map_or(symbol, |(base, _)| base)
}

/// `comp.z[1]` -> (`comp.z`, `[1]`).
fn split_subscript(name: &str) -> Option<(&str, &str)> {
    if !name.ends_with(']') {
        return None;
    }
    name.rfind('[').map(|pos| name.split_at(pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::equation_engine::BytecodeEvaluator;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T, AssemblyError>, needle: &str) {
        match result {
            Ok(value) => panic!("expected error containing '{needle}', got Ok({value:?})"),
            Err(err) => {
                let message = err.to_string();
                assert!(
                    message.contains(needle),
                    "expected error containing '{needle}', got '{message}'"
                );
            }
        }
    }

    fn builder() -> ModelBuilder<'static> {
        ModelBuilder::new(&BytecodeEvaluator)
    }

    fn objective() -> ObjectiveSpec {
        ObjectiveSpec::with_component("obj", ComponentSpec::new("obj", "obj = y").promotes(["*"]))
    }

    #[test]
    fn promoted_names_are_shared_and_unpromoted_names_are_local() {
        let mut model = builder()
            .independent("x", IndependentValue::Scalar(3.0))
            .group(GroupSpec::new(
                "g",
                vec![
                    ComponentSpec::new("a", "y = 2*x; t = x + 1")
                        .promotes_inputs(["x"])
                        .promotes_outputs(["y"]),
                ],
            ))
            .objective(objective())
            .build()
            .unwrap();

        let results = model.run_model(&CancellationToken::new()).unwrap();
        assert_eq!(model.value("y").unwrap(), 6.0);
        assert_eq!(model.value("a.t").unwrap(), 4.0);
        assert!(model.value("t").is_err());
        assert_eq!(model.groups()[0].promoted_outputs().to_vec(), vec!["y".to_string()]);
        assert_eq!(model.groups()[0].promoted_inputs().to_vec(), vec!["x".to_string()]);
        assert_eq!(results[0], crate::model::ResultEntry::new("obj", 6.0));
    }

    #[test]
    fn wildcard_promotes_every_symbol() {
        let mut model = builder()
            .independent("x", IndependentValue::Scalar(1.5))
            .group(GroupSpec::new(
                "g",
                vec![ComponentSpec::new("a", "y = x*2; w = x").promotes_outputs(["*"]).promotes_inputs(["*"])],
            ))
            .objective(objective())
            .build()
            .unwrap();
        let results = model.run_model(&CancellationToken::new()).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["obj", "y", "w"]);
    }

    #[test]
    fn array_independents_are_indexable() {
        let mut model = builder()
            .independent("z", IndependentValue::Array(vec![5.0, 2.0]))
            .group(GroupSpec::new(
                "g",
                vec![ComponentSpec::new("a", "y = z[0]**2 + z[1]").promotes(["z", "y"])],
            ))
            .objective(objective())
            .build()
            .unwrap();
        model.run_model(&CancellationToken::new()).unwrap();
        assert_eq!(model.value("y").unwrap(), 27.0);
    }

    #[test]
    fn connections_alias_local_inputs() {
        let mut model = builder()
            .independent("indeps.x", IndependentValue::Scalar(2.0))
            .independent("indeps.z", IndependentValue::Array(vec![1.0, 4.0]))
            .group(GroupSpec::new(
                "parab",
                vec![ComponentSpec::new("parab", "f = x*3 + z[1]")],
            ))
            .connect("indeps.x", ["parab.x"])
            .connect("indeps.z", ["parab.z"])
            .objective(ObjectiveSpec::reference("parab.f"))
            .build()
            .unwrap();
        let results = model.run_model(&CancellationToken::new()).unwrap();
        assert_eq!(results[0], crate::model::ResultEntry::new("parab.f", 10.0));
    }

    #[test]
    fn optional_connections_skip_unread_targets() {
        let result = builder()
            .independent("indeps.x", IndependentValue::Scalar(2.0))
            .group(GroupSpec::new("c", vec![ComponentSpec::new("c", "f = x")]))
            .connect_if_read("indeps.x", "c.x")
            .connect_if_read("indeps.x", "other.x")
            .objective(ObjectiveSpec::reference("c.f"))
            .build();
        assert!(result.is_ok());

        assert_err_contains(
            builder()
                .independent("indeps.x", IndependentValue::Scalar(2.0))
                .group(GroupSpec::new("c", vec![ComponentSpec::new("c", "f = x")]))
                .connect("indeps.x", ["c.x", "other.x"])
                .objective(ObjectiveSpec::reference("c.f"))
                .build(),
            "unknown variable 'other.x'",
        );
    }

    #[test]
    fn unconnected_local_input_is_unknown() {
        assert_err_contains(
            builder()
                .independent("x", IndependentValue::Scalar(1.0))
                .group(GroupSpec::new("g", vec![ComponentSpec::new("a", "y = x").promotes_outputs(["y"])]))
                .objective(objective())
                .build(),
            "unknown variable 'a.x' referenced by 'a'",
        );
    }

    #[test]
    fn invalid_promotion_is_rejected() {
        assert_err_contains(
            builder()
                .independent("x", IndependentValue::Scalar(1.0))
                .group(GroupSpec::new(
                    "g",
                    vec![ComponentSpec::new("a", "y = x")
                        .promotes_inputs(["x", "q"])
                        .promotes_outputs(["y"])],
                ))
                .objective(objective())
                .build(),
            "'a' promotes 'q'",
        );
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let err = builder()
            .independent("x", IndependentValue::Scalar(1.0))
            .group(GroupSpec::new(
                "g",
                vec![
                    ComponentSpec::new("a", "y = x").promotes(["*"]),
                    ComponentSpec::new("b", "y = 2*x").promotes(["*"]),
                ],
            ))
            .objective(objective())
            .build()
            .expect_err("y computed twice");
        assert_eq!(
            err,
            AssemblyError::DuplicateOutput {
                name: "y".to_string(),
                first: "a".to_string(),
                second: "b".to_string()
            }
        );

        assert_err_contains(
            builder()
                .independent("y", IndependentValue::Scalar(1.0))
                .group(GroupSpec::new("g", vec![ComponentSpec::new("a", "y = 2").promotes(["y"])]))
                .objective(objective())
                .build(),
            "independent variables",
        );
    }

    #[test]
    fn malformed_equations_name_the_component() {
        assert_err_contains(
            builder()
                .independent("x", IndependentValue::Scalar(1.0))
                .group(GroupSpec::new("g", vec![ComponentSpec::new("bad", "y = x +").promotes(["*"])]))
                .objective(objective())
                .build(),
            "malformed equation in 'bad'",
        );
    }

    #[test]
    fn duplicate_components_and_missing_objective_are_rejected() {
        assert_eq!(
            builder()
                .independent("x", IndependentValue::Scalar(1.0))
                .group(GroupSpec::new(
                    "g",
                    vec![
                        ComponentSpec::new("a", "y = x").promotes(["*"]),
                        ComponentSpec::new("a", "w = x").promotes(["*"]),
                    ],
                ))
                .objective(objective())
                .build()
                .expect_err("duplicate component"),
            AssemblyError::DuplicateComponent("a".to_string())
        );
        assert_eq!(
            builder()
                .independent("x", IndependentValue::Scalar(1.0))
                .build()
                .expect_err("no objective"),
            AssemblyError::MissingObjective
        );
    }

    #[test]
    fn design_variables_must_be_bounded_independents() {
        let base = || {
            builder()
                .independent("x", IndependentValue::Scalar(1.0))
                .group(GroupSpec::new("g", vec![ComponentSpec::new("a", "y = x").promotes(["*"])]))
                .objective(objective())
        };

        assert_eq!(
            base()
                .design_variable(DesignVariableSpec::new("y", None, None))
                .build()
                .expect_err("outputs are not design variables"),
            AssemblyError::InvalidDesignVariable("y".to_string())
        );
        assert_err_contains(
            base().design_variable(DesignVariableSpec::new("q", None, None)).build(),
            "unknown variable 'q'",
        );
        assert_err_contains(
            base()
                .design_variable(DesignVariableSpec::new("x", Some(2.0), Some(1.0)))
                .build(),
            "lower 2 exceeds upper 1",
        );

        let model = base()
            .design_variable(DesignVariableSpec::new("x", Some(-1.0), Some(1.0)))
            .build()
            .unwrap();
        let x = model.registry().index_of("x").unwrap();
        assert_eq!(model.registry().variable(x).lower_bound, Some(-1.0));
    }

    #[test]
    fn array_design_variables_expand_to_elements() {
        let model = builder()
            .independent("z", IndependentValue::Array(vec![1.0, 2.0]))
            .group(GroupSpec::new("g", vec![ComponentSpec::new("a", "y = z[0] + z[1]").promotes(["*"])]))
            .objective(objective())
            .design_variable(DesignVariableSpec::new("z", Some(0.0), Some(10.0)))
            .build()
            .unwrap();
        let labels: Vec<&str> = model
            .design_variables
            .iter()
            .map(|dv| dv.label.as_str())
            .collect();
        assert_eq!(labels, vec!["z[0]", "z[1]"]);
    }

    #[test]
    fn design_variables_are_chosen_at_most_once() {
        let base = || {
            builder()
                .independent("x", IndependentValue::Scalar(1.0))
                .independent("z", IndependentValue::Array(vec![1.0, 2.0]))
                .group(GroupSpec::new(
                    "g",
                    vec![ComponentSpec::new("a", "y = x + z[0] + z[1]").promotes(["*"])],
                ))
                .objective(objective())
        };

        assert_eq!(
            base()
                .design_variable(DesignVariableSpec::new("x", Some(0.0), Some(1.0)))
                .design_variable(DesignVariableSpec::new("x", Some(-5.0), Some(5.0)))
                .build()
                .expect_err("x is listed twice"),
            AssemblyError::DuplicateVariable("x".to_string())
        );
        assert_err_contains(
            base()
                .design_variable(DesignVariableSpec::new("z", Some(0.0), Some(10.0)))
                .design_variable(DesignVariableSpec::new("z[1]", Some(0.0), Some(3.0)))
                .build(),
            "variable 'z[1]' is declared more than once",
        );
    }

    #[test]
    fn name_helpers_split_subscripts() {
        assert_eq!(base_name("z[1]"), "z");
        assert_eq!(base_name("x"), "x");
        assert_eq!(split_subscript("comp.z[1]"), Some(("comp.z", "[1]")));
    }
}
