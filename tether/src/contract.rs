//! Node I/O contracts: declared inputs and outputs, input projection, and
//! output validation.
//!
//! A node declares required/optional inputs and guaranteed/conditional
//! outputs. The engine projects the shared state down to the declared inputs
//! before invoking the node, then validates the returned patch: guaranteed
//! fields must be present on success, and in strict mode undeclared fields are
//! rejected.

use crate::state::{Field, QueryState};

/// Declared I/O of one node.
#[derive(Debug, Clone, Default)]
pub struct NodeContract {
    /// Must be present in the shared state on entry.
    pub required_inputs: Vec<Field>,
    /// Permitted but not required on entry.
    pub optional_inputs: Vec<Field>,
    /// Must be present in the node's patch on success.
    pub guaranteed_outputs: Vec<Field>,
    /// May be present in the patch.
    pub conditional_outputs: Vec<Field>,
}

impl NodeContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requires(mut self, fields: &[Field]) -> Self {
        self.required_inputs.extend_from_slice(fields);
        self
    }

    pub fn optional(mut self, fields: &[Field]) -> Self {
        self.optional_inputs.extend_from_slice(fields);
        self
    }

    pub fn guarantees(mut self, fields: &[Field]) -> Self {
        self.guaranteed_outputs.extend_from_slice(fields);
        self
    }

    pub fn conditional(mut self, fields: &[Field]) -> Self {
        self.conditional_outputs.extend_from_slice(fields);
        self
    }

    /// All fields the node may read: required + optional.
    pub fn input_fields(&self) -> Vec<Field> {
        let mut fields = self.required_inputs.clone();
        for f in &self.optional_inputs {
            if !fields.contains(f) {
                fields.push(*f);
            }
        }
        fields
    }

    /// Required inputs missing from `state`; empty means the node may run.
    pub fn missing_inputs(&self, state: &QueryState) -> Vec<Field> {
        self.required_inputs
            .iter()
            .copied()
            .filter(|f| !state.has(*f))
            .collect()
    }

    /// Validates a successful node's patch against the declared outputs.
    pub fn validate_outputs(&self, patch: &QueryState, strict: bool) -> Result<(), ContractIssue> {
        let missing: Vec<Field> = self
            .guaranteed_outputs
            .iter()
            .copied()
            .filter(|f| !patch.has(*f))
            .collect();
        if !missing.is_empty() {
            return Err(ContractIssue::MissingGuaranteed(missing));
        }
        if strict {
            let undeclared: Vec<Field> = patch
                .present_fields()
                .into_iter()
                .filter(|f| {
                    !self.guaranteed_outputs.contains(f) && !self.conditional_outputs.contains(f)
                })
                .collect();
            if !undeclared.is_empty() {
                return Err(ContractIssue::Undeclared(undeclared));
            }
        }
        Ok(())
    }
}

/// A contract check failure, reported as `ContractViolation` by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractIssue {
    MissingGuaranteed(Vec<Field>),
    Undeclared(Vec<Field>),
}

impl std::fmt::Display for ContractIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractIssue::MissingGuaranteed(fields) => {
                write!(f, "missing guaranteed outputs: {:?}", fields)
            }
            ContractIssue::Undeclared(fields) => {
                write!(f, "undeclared outputs: {:?}", fields)
            }
        }
    }
}
