//! Variables model and the per-stop handles it is built from.
//! - VariablesReference: engine reference tagged with its stop generation
//! - VariableScope/FrameSnapshot: materialized scope trees
//! - VariablesModel: scopes of the active frame

use parking_lot::Mutex;

use crate::protocol;
use crate::signal::{Signal, Subscription};

/// Handle to a structured value, valid only for the stop that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariablesReference {
    generation: u64,
    raw: u32,
}

impl VariablesReference {
    pub(crate) fn new(generation: u64, raw: u32) -> Self {
        Self { generation, raw }
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        self.raw
    }

    #[must_use]
    pub fn generation(self) -> u64 {
        self.generation
    }

    /// Atomic values carry reference `0`.
    #[must_use]
    pub fn is_expandable(self) -> bool {
        self.raw != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    pub reference: VariablesReference,
}

impl Variable {
    pub(crate) fn from_protocol(variable: protocol::Variable, generation: u64) -> Self {
        Self {
            name: variable.name,
            value: variable.value,
            type_name: variable.r#type,
            reference: VariablesReference::new(generation, variable.variables_reference),
        }
    }
}

/// One scope of a frame. `variables` is `None` until loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableScope {
    pub name: String,
    pub reference: VariablesReference,
    pub expensive: bool,
    pub variables: Option<Vec<Variable>>,
}

impl VariableScope {
    pub(crate) fn from_protocol(scope: protocol::Scope, generation: u64) -> Self {
        Self {
            name: scope.name,
            reference: VariablesReference::new(generation, scope.variables_reference),
            expensive: scope.expensive,
            variables: None,
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.variables.is_some()
    }
}

/// Materialized scopes of one stack frame for the current stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub id: u32,
    pub scopes: Vec<VariableScope>,
}

#[derive(Debug, Default)]
pub struct VariablesModel {
    scopes: Mutex<Vec<VariableScope>>,
    changed: Signal<Vec<VariableScope>>,
}

impl VariablesModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scopes(&self) -> Vec<VariableScope> {
        self.scopes.lock().clone()
    }

    /// Replace the whole tree and notify once.
    pub fn set_scopes(&self, scopes: Vec<VariableScope>) {
        *self.scopes.lock() = scopes.clone();
        self.changed.emit(scopes);
    }

    pub fn clear(&self) {
        self.set_scopes(Vec::new());
    }

    pub fn changed(&self) -> &Signal<Vec<VariableScope>> {
        &self.changed
    }

    pub fn subscribe(&self) -> Subscription<Vec<VariableScope>> {
        self.changed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::{VariableScope, VariablesModel, VariablesReference};
    use crate::protocol;

    #[test]
    fn set_scopes_replaces_tree_and_notifies_once() {
        let model = VariablesModel::new();
        let mut changes = model.subscribe();
        let scope = VariableScope::from_protocol(
            protocol::Scope {
                name: "Locals".to_string(),
                variables_reference: 5,
                expensive: false,
            },
            3,
        );

        model.set_scopes(vec![scope.clone()]);
        assert_eq!(model.scopes(), vec![scope]);
        assert_eq!(changes.try_recv().map(|scopes| scopes.len()), Some(1));
        assert!(changes.try_recv().is_none());

        model.clear();
        assert!(model.scopes().is_empty());
    }

    #[test]
    fn references_remember_their_generation() {
        let reference = VariablesReference::new(4, 0);
        assert!(!reference.is_expandable());
        assert_eq!(reference.generation(), 4);
        assert!(VariablesReference::new(4, 9).is_expandable());
    }
}
