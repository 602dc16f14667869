//! Debug session orchestrator.
//! - lifecycle: start/stop/restart/restore_state and the session/model slots
//! - breakpoints: breakpoint intents, code registration and flushing
//! - run_control: execution, continue/step, frame selection, expansion
//! - events: engine event loop
//! - stop: generation-tagged stop pipeline and active-frame follower
//! - tests: controller scenarios against a fake engine

mod breakpoints;
mod events;
mod lifecycle;
mod run_control;
mod stop;


use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{DebugError, DebugResult};
use crate::model::{DebuggerModel, FrameSnapshot, SourceProvider};
use crate::protocol::{Capabilities, StackFrame};
use crate::session::DebugSession;
use crate::signal::Signal;
use crate::source_id::{IdentityFormat, SourceRegistry};
use crate::transport::Transport;

/// Runs code in the debuggee, e.g. by forwarding it to a kernel.
pub trait CodeExecutor: Send + Sync {
    fn execute(&self, code: &str) -> DebugResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    pub client_id: String,
    pub adapter_id: String,
    /// Thread used for run control until the engine reports one.
    pub default_thread_id: u32,
    pub identity: IdentityFormat,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            client_id: "trust-debug-client".to_string(),
            adapter_id: "python".to_string(),
            default_thread_id: 1,
            identity: IdentityFormat::default(),
        }
    }
}

/// Orchestrator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Started,
    Running,
    Stopped,
    Terminated,
    Restarting,
}

/// Data materialized by the current stop; replaced wholesale per generation.
#[derive(Debug, Default)]
struct StopCache {
    /// Call stack in engine order.
    stack: Vec<StackFrame>,
    frames: HashMap<u32, FrameSnapshot>,
    /// Engine references handed out for this stop.
    references: HashSet<u32>,
    /// Frame whose scopes the variables model currently shows.
    shown_frame: Option<u32>,
}

#[derive(Debug)]
struct Runtime {
    state: SessionState,
    transport: Option<Transport>,
    capabilities: Capabilities,
    thread_id: Option<u32>,
    configured: bool,
    generation: u64,
    /// Bumped on every connect and teardown; event loops of older epochs exit.
    epoch: u64,
    stop: StopCache,
    follower: Option<JoinHandle<()>>,
    /// Runtime the session was started on; background work spawns here so
    /// synchronous entry points work from threads outside it.
    handle: Option<Handle>,
}

impl Runtime {
    fn spawn_handle(&self) -> Option<Handle> {
        self.handle.clone().or_else(|| Handle::try_current().ok())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            transport: None,
            capabilities: Capabilities::default(),
            thread_id: None,
            configured: false,
            generation: 0,
            epoch: 0,
            stop: StopCache::default(),
            follower: None,
            handle: None,
        }
    }
}

// Lock order: `runtime`, then the model slot, then locks inside the models.
struct ControllerInner {
    options: ControllerOptions,
    registry: SourceRegistry,
    runtime: Mutex<Runtime>,
    session: Mutex<Option<Arc<DebugSession>>>,
    model: Mutex<Option<Arc<DebuggerModel>>>,
    executor: Mutex<Option<Arc<dyn CodeExecutor>>>,
    source_provider: Mutex<Option<Arc<dyn SourceProvider>>>,
    session_changed: Signal<Option<Arc<DebugSession>>>,
    model_changed: Signal<Option<Arc<DebuggerModel>>>,
    state_changed: Signal<SessionState>,
}

/// Drives one engine session and keeps the debugger models coherent with it.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct DebugController {
    inner: Arc<ControllerInner>,
}

impl fmt::Debug for DebugController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runtime = self.inner.runtime.lock();
        f.debug_struct("DebugController")
            .field("state", &runtime.state)
            .field("generation", &runtime.generation)
            .field("thread_id", &runtime.thread_id)
            .finish()
    }
}

impl DebugController {
    /// A controller with a fresh model and no session.
    #[must_use]
    pub fn new(options: ControllerOptions) -> Self {
        let registry = SourceRegistry::new(options.identity.clone());
        Self {
            inner: Arc::new(ControllerInner {
                options,
                registry,
                runtime: Mutex::new(Runtime::default()),
                session: Mutex::new(None),
                model: Mutex::new(Some(Arc::new(DebuggerModel::new()))),
                executor: Mutex::new(None),
                source_provider: Mutex::new(None),
                session_changed: Signal::new(),
                model_changed: Signal::new(),
                state_changed: Signal::new(),
            }),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ControllerOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn registry(&self) -> &SourceRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn session(&self) -> Option<Arc<DebugSession>> {
        self.inner.session.lock().clone()
    }

    #[must_use]
    pub fn model(&self) -> Option<Arc<DebuggerModel>> {
        self.inner.model.lock().clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.runtime.lock().state
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.runtime.lock().generation
    }

    #[must_use]
    pub fn thread_id(&self) -> Option<u32> {
        self.inner.runtime.lock().thread_id
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.inner.runtime.lock().capabilities.clone()
    }

    pub fn set_executor(&self, executor: Option<Arc<dyn CodeExecutor>>) {
        *self.inner.executor.lock() = executor;
    }

    pub fn set_source_provider(&self, provider: Option<Arc<dyn SourceProvider>>) {
        *self.inner.source_provider.lock() = provider;
    }

    pub fn session_changed(&self) -> &Signal<Option<Arc<DebugSession>>> {
        &self.inner.session_changed
    }

    pub fn model_changed(&self) -> &Signal<Option<Arc<DebuggerModel>>> {
        &self.inner.model_changed
    }

    pub fn state_changed(&self) -> &Signal<SessionState> {
        &self.inner.state_changed
    }

    fn transition(&self, runtime: &mut Runtime, next: SessionState) {
        if runtime.state != next {
            runtime.state = next;
            self.inner.state_changed.emit(next);
        }
    }

    fn require_transport(&self) -> DebugResult<Transport> {
        let runtime = self.inner.runtime.lock();
        match (&runtime.transport, runtime.state) {
            (Some(transport), _) => Ok(transport.clone()),
            (None, SessionState::Terminated) => Err(DebugError::Disposed),
            (None, _) => Err(DebugError::configuration("debugger is not started")),
        }
    }

    fn require_model(&self) -> DebugResult<Arc<DebuggerModel>> {
        self.model()
            .ok_or_else(|| DebugError::configuration("no debugger model attached"))
    }

    fn current_thread(&self) -> u32 {
        self.inner
            .runtime
            .lock()
            .thread_id
            .unwrap_or(self.inner.options.default_thread_id)
    }
}
