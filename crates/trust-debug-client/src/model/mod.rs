//! Observable debugger models.
//! - breakpoints: intended and acknowledged breakpoints per source
//! - callstack: frames of the current stop and the active frame
//! - variables: scope tree of the active frame
//! - sources: source shown for the paused location

mod breakpoints;
mod callstack;
mod sources;
mod variables;

pub use breakpoints::{
    Breakpoint, BreakpointSnapshot, BreakpointStore, BreakpointsChanged, PersistedBreakpoint,
};
pub use callstack::CallstackModel;
pub use sources::{mime_type_for_path, CurrentSource, SourceContent, SourceProvider, SourcesModel};
pub use variables::{FrameSnapshot, Variable, VariableScope, VariablesModel, VariablesReference};

/// The set of models one controller mutates. Consumers hold an `Arc` to it.
#[derive(Debug, Default)]
pub struct DebuggerModel {
    pub breakpoints: BreakpointStore,
    pub callstack: CallstackModel,
    pub variables: VariablesModel,
    pub sources: SourcesModel,
}

impl DebuggerModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the stop-scoped views; breakpoints are untouched.
    pub fn clear_stop_state(&self) {
        self.callstack.set_frames(Vec::new());
        self.variables.clear();
        self.sources.set_current(None);
    }
}
