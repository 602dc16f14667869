//! Debug Adapter Protocol (DAP) client for kernel debuggers.
//! - transport: framed channel with request/response correlation
//! - session: connector-backed lifetime of one engine connection
//! - controller: lifecycle, run control and stop pipeline
//! - model: breakpoints, call stack, variables and current source

mod config;
mod controller;
mod error;
mod model;
pub mod protocol;
mod session;
mod signal;
mod source_id;
#[cfg(test)]
mod test_support;
mod transport;

pub use config::{AdapterConfig, ClientConfig, ClientSettings, ConfigError, CONFIG_FILE};
pub use controller::{CodeExecutor, ControllerOptions, DebugController, SessionState};
pub use error::{DebugError, DebugResult};
pub use model::{
    mime_type_for_path, Breakpoint, BreakpointSnapshot, BreakpointStore, BreakpointsChanged,
    CallstackModel, CurrentSource, DebuggerModel, FrameSnapshot, PersistedBreakpoint,
    SourceContent, SourceProvider, SourcesModel, Variable, VariableScope, VariablesModel,
    VariablesReference,
};
pub use session::DebugSession;
pub use signal::{Signal, Subscription, SubscriptionId};
pub use source_id::{IdentityFormat, SourceIdentity, SourceRegistry};
pub use transport::{
    read_message, spawn_stream_channel, write_message, Channel, Connector, ProcessConnector,
    Transport,
};
