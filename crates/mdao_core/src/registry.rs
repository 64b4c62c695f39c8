//! Variable storage shared by every equation of one model graph.
//!
//! The registry is owned by exactly one [`ModelGraph`](crate::model::ModelGraph)
//! and lent to equation nodes for the duration of a single evaluation. It keeps
//! no caches: a read always observes the most recent write.

use crate::error::AssemblyError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dense handle to a declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableRole {
    /// Set by the caller (and possibly the optimizer), never by an equation.
    Independent,
    /// Written by exactly one equation node.
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub value: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub role: VariableRole,
}

impl Variable {
    pub fn independent(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value,
            lower_bound: None,
            upper_bound: None,
            role: VariableRole::Independent,
        }
    }

    /// Equation outputs start at 1.0 until their first evaluation.
    pub fn output(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: 1.0,
            lower_bound: None,
            upper_bound: None,
            role: VariableRole::Output,
        }
    }

    pub fn with_bounds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: Vec<Variable>,
    index: HashMap<String, VarId>,
    arrays: HashMap<String, Vec<VarId>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Declares a new variable. Fails if the id is already taken.
    pub fn declare(&mut self, variable: Variable) -> Result<VarId, AssemblyError> {
        if self.index.contains_key(&variable.id) || self.arrays.contains_key(&variable.id) {
            return Err(AssemblyError::DuplicateVariable(variable.id));
        }
        if let (Some(lower), Some(upper)) = (variable.lower_bound, variable.upper_bound) {
            if lower > upper {
                return Err(AssemblyError::InvalidBounds {
                    id: variable.id,
                    lower,
                    upper,
                });
            }
        }
        let id = VarId(self.variables.len());
        self.index.insert(variable.id.clone(), id);
        self.variables.push(variable);
        Ok(id)
    }

    /// Declares `id[0]`, `id[1]`, ... one element variable per value.
    pub fn declare_array(
        &mut self,
        id: &str,
        values: &[f64],
        role: VariableRole,
    ) -> Result<Vec<VarId>, AssemblyError> {
        if self.index.contains_key(id) || self.arrays.contains_key(id) {
            return Err(AssemblyError::DuplicateVariable(id.to_string()));
        }
        let mut ids = Vec::with_capacity(values.len());
        for (i, &value) in values.iter().enumerate() {
            let element = Variable {
                id: element_id(id, i),
                value,
                lower_bound: None,
                upper_bound: None,
                role,
            };
            ids.push(self.declare(element)?);
        }
        self.arrays.insert(id.to_string(), ids.clone());
        Ok(ids)
    }

    pub fn index_of(&self, id: &str) -> Option<VarId> {
        self.index.get(id).copied()
    }

    /// Resolves `id` to the scalar it names, or to every element when it names an array.
    pub fn elements(&self, id: &str) -> Option<Vec<VarId>> {
        if let Some(var) = self.index_of(id) {
            return Some(vec![var]);
        }
        self.arrays.get(id).cloned()
    }

    pub fn get(&self, id: &str) -> Result<f64, AssemblyError> {
        self.index_of(id)
            .map(|var| self.value_at(var))
            .ok_or_else(|| unknown(id))
    }

    pub fn set(&mut self, id: &str, value: f64) -> Result<(), AssemblyError> {
        let var = self.index_of(id).ok_or_else(|| unknown(id))?;
        self.set_at(var, value);
        Ok(())
    }

    pub fn value_at(&self, var: VarId) -> f64 {
        self.variables[var.0].value
    }

    pub fn set_at(&mut self, var: VarId, value: f64) {
        self.variables[var.0].value = value;
    }

    pub fn set_bounds(&mut self, var: VarId, lower: Option<f64>, upper: Option<f64>) {
        let variable = &mut self.variables[var.0];
        variable.lower_bound = lower;
        variable.upper_bound = upper;
    }

    pub fn variable(&self, var: VarId) -> &Variable {
        &self.variables[var.0]
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    /// Current (id, value) pairs in declaration order.
    pub fn snapshot(&self) -> Vec<(String, f64)> {
        self.variables
            .iter()
            .map(|var| (var.id.clone(), var.value))
            .collect()
    }
}

pub fn element_id(base: &str, index: usize) -> String {
    format!("{base}[{index}]")
}

fn unknown(id: &str) -> AssemblyError {
    AssemblyError::UnknownVariable {
        name: id.to_string(),
        referenced_by: "registry".to_string(),
    }
}
