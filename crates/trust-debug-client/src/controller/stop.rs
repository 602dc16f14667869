//! Stop pipeline.
//! - begin_stop: start a new generation and fetch its data
//! - enter_running: drop the current stop
//! - show_frame/follower: push cached scopes on active-frame changes
//! - source refresh: publish the paused location's source

use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::error::{DebugError, DebugResult};
use crate::model::{CurrentSource, DebuggerModel, FrameSnapshot, Variable, VariableScope};
use crate::protocol::{
    ScopesArguments, ScopesResponseBody, StackFrame, StackTraceArguments, StackTraceResponseBody,
    VariablesArguments, VariablesResponseBody,
};
use crate::signal::Subscription;
use crate::transport::Transport;

use super::{ControllerInner, DebugController, Runtime, SessionState};

enum PipelineError {
    /// A newer generation started; the result is discarded.
    Stale,
    Failed(DebugError),
}

impl From<DebugError> for PipelineError {
    fn from(err: DebugError) -> Self {
        Self::Failed(err)
    }
}

impl DebugController {
    /// Start a new stop generation for `thread_id`; results of older
    /// generations still in flight are discarded when they land.
    /// The previous stop's views are cleared right away so nothing can be
    /// selected against frames whose snapshots are gone.
    pub(super) fn begin_stop(&self, thread_id: u32) {
        let (generation, transport, follower, handle) = {
            let mut runtime = self.inner.runtime.lock();
            let Some(transport) = runtime.transport.clone() else {
                return;
            };
            runtime.generation += 1;
            runtime.thread_id = Some(thread_id);
            runtime.stop = Default::default();
            (
                runtime.generation,
                transport,
                runtime.follower.take(),
                runtime.spawn_handle(),
            )
        };
        if let Some(follower) = follower {
            follower.abort();
        }
        if let Some(model) = self.model() {
            model.clear_stop_state();
        }
        let Some(handle) = handle else {
            warn!(generation, thread_id, "no async runtime to run the stop pipeline on");
            return;
        };
        debug!(generation, thread_id, "stop pipeline started");

        let controller = self.clone();
        handle.spawn(async move {
            match controller.run_stop_pipeline(generation, thread_id, &transport).await {
                Ok(()) => debug!(generation, "stop published"),
                Err(PipelineError::Stale) => {
                    debug!(generation, "discarding superseded stop pipeline");
                }
                Err(PipelineError::Failed(err)) => {
                    warn!(generation, thread_id, "stop pipeline failed: {err}");
                }
            }
        });
    }

    /// Drop the current stop: clear the cache and the stop-scoped models.
    /// Returns the state before the call.
    pub(super) fn enter_running(&self) -> SessionState {
        let (previous, follower) = {
            let mut runtime = self.inner.runtime.lock();
            let previous = runtime.state;
            if runtime.transport.is_none() {
                return previous;
            }
            runtime.generation += 1;
            runtime.stop = Default::default();
            self.transition(&mut runtime, SessionState::Running);
            (previous, runtime.follower.take())
        };
        if let Some(follower) = follower {
            follower.abort();
        }
        if let Some(model) = self.model() {
            model.clear_stop_state();
        }
        previous
    }

    async fn run_stop_pipeline(
        &self,
        generation: u64,
        thread_id: u32,
        transport: &Transport,
    ) -> Result<(), PipelineError> {
        let trace: StackTraceResponseBody = transport
            .request(
                "stackTrace",
                &StackTraceArguments {
                    thread_id,
                    start_frame: None,
                    levels: None,
                },
            )
            .await?;
        self.ensure_current(generation)?;

        let frames = trace.stack_frames;
        let results = join_all(
            frames
                .iter()
                .map(|frame| materialize_frame(transport, frame.id, generation)),
        )
        .await;
        let snapshots = frames
            .iter()
            .zip(results)
            .filter_map(|(frame, result)| match result {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    warn!(generation, frame_id = frame.id, "failed to load frame: {err}");
                    None
                }
            })
            .collect();
        self.publish_stop(generation, frames, snapshots)
    }

    fn ensure_current(&self, generation: u64) -> Result<(), PipelineError> {
        if self.inner.runtime.lock().generation == generation {
            Ok(())
        } else {
            Err(PipelineError::Stale)
        }
    }

    fn publish_stop(
        &self,
        generation: u64,
        frames: Vec<StackFrame>,
        snapshots: Vec<FrameSnapshot>,
    ) -> Result<(), PipelineError> {
        let model = self.model();
        let active = {
            let mut runtime = self.inner.runtime.lock();
            if runtime.generation != generation || runtime.transport.is_none() {
                return Err(PipelineError::Stale);
            }
            for snapshot in &snapshots {
                register_references(&mut runtime, snapshot);
            }
            runtime.stop.frames = snapshots
                .into_iter()
                .map(|snapshot| (snapshot.id, snapshot))
                .collect();
            runtime.stop.stack.clone_from(&frames);
            self.transition(&mut runtime, SessionState::Stopped);
            let Some(model) = model else {
                return Ok(());
            };
            self.present(&mut runtime, &model, generation, Some(frames))
        };
        self.spawn_source_refresh(generation, active);
        Ok(())
    }

    /// Republish the cached stop, e.g. into a newly attached model.
    pub(super) fn republish_stop(&self) {
        let Some(model) = self.model() else {
            return;
        };
        let (generation, active) = {
            let mut runtime = self.inner.runtime.lock();
            if runtime.state != SessionState::Stopped {
                return;
            }
            if let Some(follower) = runtime.follower.take() {
                follower.abort();
            }
            let generation = runtime.generation;
            runtime.stop.shown_frame = None;
            let frames = runtime.stop.stack.clone();
            (generation, self.present(&mut runtime, &model, generation, Some(frames)))
        };
        self.spawn_source_refresh(generation, active);
    }

    /// Push frames (when given) and the active frame's scopes into `model`,
    /// then follow active-frame changes for this generation. Runs under the
    /// runtime lock so no other generation can interleave.
    fn present(
        &self,
        runtime: &mut Runtime,
        model: &Arc<DebuggerModel>,
        generation: u64,
        frames: Option<Vec<StackFrame>>,
    ) -> Option<StackFrame> {
        if let Some(frames) = frames {
            model.callstack.set_frames(frames);
        }
        let active = model.callstack.frame();
        let active_id = active.as_ref().map(|frame| frame.id);
        runtime.stop.shown_frame = active_id;
        model.variables.set_scopes(cached_scopes(runtime, active_id));

        if let Some(handle) = runtime.spawn_handle() {
            let changes = model.callstack.subscribe_current_frame();
            runtime.follower = Some(handle.spawn(follow_active_frame(
                Arc::downgrade(&self.inner),
                Arc::downgrade(model),
                generation,
                changes,
            )));
        }
        active
    }

    /// Show the cached scopes of `frame` if it is not already shown.
    /// Returns whether the variables model changed.
    pub(super) fn show_frame(&self, generation: u64, frame: Option<&StackFrame>) -> bool {
        let Some(model) = self.model() else {
            return false;
        };
        let mut runtime = self.inner.runtime.lock();
        if runtime.generation != generation || runtime.state != SessionState::Stopped {
            return false;
        }
        let frame_id = frame.map(|frame| frame.id);
        if runtime.stop.shown_frame == frame_id {
            return false;
        }
        runtime.stop.shown_frame = frame_id;
        model.variables.set_scopes(cached_scopes(&runtime, frame_id));
        true
    }

    pub(super) fn spawn_source_refresh(&self, generation: u64, frame: Option<StackFrame>) {
        let handle = self.inner.runtime.lock().spawn_handle();
        let Some(handle) = handle else {
            debug!(generation, "no async runtime; current source not refreshed");
            return;
        };
        let controller = self.clone();
        handle.spawn(async move { controller.refresh_source(generation, frame).await });
    }

    async fn refresh_source(&self, generation: u64, frame: Option<StackFrame>) {
        let resolved = match frame.as_ref() {
            Some(frame) => match frame.source_path() {
                Some(path) => self.get_source(path).await.map(|content| CurrentSource {
                    path: path.to_string(),
                    content: content.content,
                    mime_type: content.mime_type,
                    line: frame.line,
                }),
                None => None,
            },
            None => None,
        };
        let Some(model) = self.model() else {
            return;
        };
        let runtime = self.inner.runtime.lock();
        if runtime.generation != generation
            || runtime.stop.shown_frame != frame.as_ref().map(|frame| frame.id)
        {
            return;
        }
        model.sources.set_current(resolved);
    }
}

/// Scopes of `frame_id`, then the variables of its first scope. Later scopes
/// load on demand.
async fn materialize_frame(
    transport: &Transport,
    frame_id: u32,
    generation: u64,
) -> DebugResult<FrameSnapshot> {
    let body: ScopesResponseBody = transport
        .request("scopes", &ScopesArguments { frame_id })
        .await?;
    let mut scopes: Vec<VariableScope> = body
        .scopes
        .into_iter()
        .map(|scope| VariableScope::from_protocol(scope, generation))
        .collect();
    if let Some(first) = scopes.first_mut() {
        let variables = if first.reference.is_expandable() {
            let body: VariablesResponseBody = transport
                .request(
                    "variables",
                    &VariablesArguments {
                        variables_reference: first.reference.raw(),
                    },
                )
                .await?;
            body.variables
                .into_iter()
                .map(|variable| Variable::from_protocol(variable, generation))
                .collect()
        } else {
            Vec::new()
        };
        first.variables = Some(variables);
    }
    Ok(FrameSnapshot {
        id: frame_id,
        scopes,
    })
}

fn register_references(runtime: &mut Runtime, snapshot: &FrameSnapshot) {
    for scope in &snapshot.scopes {
        if scope.reference.is_expandable() {
            runtime.stop.references.insert(scope.reference.raw());
        }
        for variable in scope.variables.iter().flatten() {
            if variable.reference.is_expandable() {
                runtime.stop.references.insert(variable.reference.raw());
            }
        }
    }
}

fn cached_scopes(runtime: &Runtime, frame_id: Option<u32>) -> Vec<VariableScope> {
    frame_id
        .and_then(|id| runtime.stop.frames.get(&id))
        .map(|snapshot| snapshot.scopes.clone())
        .unwrap_or_default()
}

/// Push cached scopes whenever the active frame of `generation` changes.
/// The callstack's current frame is read on each wakeup, so a burst of
/// selections settles on the last one.
async fn follow_active_frame(
    inner: Weak<ControllerInner>,
    model: Weak<DebuggerModel>,
    generation: u64,
    mut changes: Subscription<Option<StackFrame>>,
) {
    while changes.recv().await.is_some() {
        let (Some(inner), Some(model)) = (inner.upgrade(), model.upgrade()) else {
            return;
        };
        let controller = DebugController { inner };
        let attached = controller
            .model()
            .is_some_and(|current| Arc::ptr_eq(&current, &model));
        if !attached || controller.generation() != generation {
            return;
        }
        let frame = model.callstack.frame();
        if controller.show_frame(generation, frame.as_ref()) {
            controller.spawn_source_refresh(generation, frame);
        }
    }
}
