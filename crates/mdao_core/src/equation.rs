use crate::error::{AssemblyError, EngineError, EvaluationError};
use crate::registry::{VarId, VariableRegistry};
use crate::traits::CompiledExpression;

/// One compiled equation wired to registry variables.
///
/// The node is stateless between evaluations: everything it reads and writes
/// lives in the registry passed to [`EquationNode::evaluate`].
#[derive(Debug)]
pub struct EquationNode {
    id: String,
    text: String,
    compiled: Box<dyn CompiledExpression>,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
}

impl EquationNode {
    /// Binds `compiled` to registry variables.
    ///
    /// `input_names` and `output_names` are the resolved variable ids for the
    /// compiled expression's inputs and outputs, in the same order. Every name
    /// must already be declared.
    pub fn bind(
        id: impl Into<String>,
        text: impl Into<String>,
        compiled: Box<dyn CompiledExpression>,
        input_names: &[String],
        output_names: &[String],
        registry: &VariableRegistry,
    ) -> Result<Self, AssemblyError> {
        let id = id.into();
        let malformed = |found: usize, expected: usize| AssemblyError::MalformedEquation {
            component: id.clone(),
            source: EvaluationError::Binding { expected, found },
        };
        if input_names.len() != compiled.inputs().len() {
            return Err(malformed(input_names.len(), compiled.inputs().len()));
        }
        if output_names.len() != compiled.outputs().len() {
            return Err(malformed(output_names.len(), compiled.outputs().len()));
        }

        let resolve = |name: &String| {
            registry
                .index_of(name)
                .ok_or_else(|| AssemblyError::UnknownVariable {
                    name: name.clone(),
                    referenced_by: id.clone(),
                })
        };
        let inputs = input_names.iter().map(resolve).collect::<Result<Vec<_>, _>>()?;
        let outputs = output_names.iter().map(resolve).collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            text: text.into(),
            compiled,
            inputs,
            outputs,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    /// Reads the current inputs, evaluates, and writes every output back.
    pub fn evaluate(&self, registry: &mut VariableRegistry) -> Result<(), EngineError> {
        let bindings: Vec<f64> = self
            .inputs
            .iter()
            .map(|&var| registry.value_at(var))
            .collect();
        let mut out = vec![0.0; self.outputs.len()];
        self.compiled
            .evaluate(&bindings, &mut out)
            .map_err(|source| EngineError::EquationEvaluation {
                equation: self.id.clone(),
                source,
            })?;
        for (&var, value) in self.outputs.iter().zip(out) {
            registry.set_at(var, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::EquationNode;
    use crate::equation_engine::BytecodeEvaluator;
    use crate::error::{AssemblyError, EngineError, EvaluationError};
    use crate::registry::{Variable, VariableRegistry};
    use crate::traits::ExpressionEvaluator;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn evaluate_writes_outputs_into_registry() {
        let mut registry = VariableRegistry::new();
        registry.declare(Variable::independent("x", 3.0)).unwrap();
        let y = registry.declare(Variable::output("y")).unwrap();
        let compiled = BytecodeEvaluator.compile("y = 2*x + 1").unwrap();
        let node = EquationNode::bind(
            "lin",
            "y = 2*x + 1",
            compiled,
            &names(&["x"]),
            &names(&["y"]),
            &registry,
        )
        .unwrap();

        node.evaluate(&mut registry).unwrap();
        assert_eq!(registry.value_at(y), 7.0);

        registry.set("x", 0.0).unwrap();
        node.evaluate(&mut registry).unwrap();
        assert_eq!(registry.value_at(y), 1.0);
    }

    #[test]
    fn bind_rejects_undeclared_names() {
        let registry = VariableRegistry::new();
        let compiled = BytecodeEvaluator.compile("y = x").unwrap();
        let err = EquationNode::bind(
            "copy",
            "y = x",
            compiled,
            &names(&["x"]),
            &names(&["y"]),
            &registry,
        )
        .expect_err("x is not declared");
        assert_eq!(
            err,
            AssemblyError::UnknownVariable {
                name: "x".to_string(),
                referenced_by: "copy".to_string()
            }
        );
    }

    #[test]
    fn evaluation_failures_name_the_equation() {
        let mut registry = VariableRegistry::new();
        registry.declare(Variable::independent("x", 0.0)).unwrap();
        registry.declare(Variable::output("y")).unwrap();
        let compiled = BytecodeEvaluator.compile("y = 1/x").unwrap();
        let node = EquationNode::bind(
            "inv",
            "y = 1/x",
            compiled,
            &names(&["x"]),
            &names(&["y"]),
            &registry,
        )
        .unwrap();
        let err = node.evaluate(&mut registry).expect_err("division by zero");
        assert_eq!(
            err,
            EngineError::EquationEvaluation {
                equation: "inv".to_string(),
                source: EvaluationError::DivisionByZero
            }
        );
        assert_eq!(registry.get("y").unwrap(), 1.0, "failed evaluation must not write");
    }
}
