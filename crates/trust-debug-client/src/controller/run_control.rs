//! Run control and inspection entry points.
//! - execute: register code, flush breakpoints, run it
//! - continue_execution/next/step_in/step_out
//! - select_frame: switch the active frame from the stop cache
//! - expand/expand_scope: lazy variable loading for the current stop
//! - get_source: provider lookup with engine fallback

use tracing::{debug, warn};

use crate::error::{DebugError, DebugResult};
use crate::model::{mime_type_for_path, SourceContent, Variable, VariablesReference};
use crate::protocol::{
    Source, SourceArguments, SourceResponseBody, StackFrame, ThreadArguments, VariablesArguments,
    VariablesResponseBody,
};
use crate::source_id::SourceIdentity;

use super::{DebugController, SessionState};

impl DebugController {
    /// Run `code` through the registered executor. When a session is live the
    /// code is registered first and breakpoints are flushed: all of them
    /// before the first run of a session lifetime, pending ones afterwards.
    pub async fn execute(&self, code: &str) -> DebugResult<SourceIdentity> {
        let executor = self
            .inner
            .executor
            .lock()
            .clone()
            .ok_or_else(|| DebugError::configuration("no code executor registered"))?;
        let source = if self.is_started() {
            let source = self.dump_cell(code).await?;
            if self.is_configured() {
                self.flush_pending().await?;
            } else {
                self.flush_all().await?;
                self.ensure_configured().await?;
            }
            self.enter_running();
            source
        } else {
            self.inner.registry.identify(code)
        };
        debug!(source = %source, "executing code");
        executor.execute(code)?;
        Ok(source)
    }

    pub async fn continue_execution(&self) -> DebugResult<()> {
        self.resume("continue").await
    }

    pub async fn next(&self) -> DebugResult<()> {
        self.resume("next").await
    }

    pub async fn step_in(&self) -> DebugResult<()> {
        self.resume("stepIn").await
    }

    pub async fn step_out(&self) -> DebugResult<()> {
        self.resume("stepOut").await
    }

    /// The models are cleared before the request goes out; a rejected
    /// request re-runs the stop pipeline so the stopped view comes back.
    async fn resume(&self, command: &'static str) -> DebugResult<()> {
        let transport = self.require_transport()?;
        let thread_id = self.current_thread();
        let arguments = serde_json::to_value(ThreadArguments { thread_id })
            .map_err(|err| DebugError::protocol(format!("failed to encode '{command}': {err}")))?;
        let previous = self.enter_running();
        match transport.send_request(command, Some(arguments)).await {
            Ok(_) => {
                debug!(command, thread_id, "resumed");
                Ok(())
            }
            Err(err) => {
                warn!(command, thread_id, "resume failed: {err}");
                if previous == SessionState::Stopped && self.state() == SessionState::Running {
                    self.begin_stop(thread_id);
                }
                Err(err)
            }
        }
    }

    /// Make `frame` active and show its cached scopes. No request is sent; a
    /// frame without a cached snapshot shows no scopes.
    pub fn select_frame(&self, frame: Option<StackFrame>) {
        let Some(model) = self.model() else {
            return;
        };
        model.callstack.set_frame(frame.clone());
        let generation = self.generation();
        if self.show_frame(generation, frame.as_ref()) {
            self.spawn_source_refresh(generation, frame);
        }
    }

    /// Fetch the children of a structured value. References from an earlier
    /// stop are rejected with a protocol error; callers show an empty
    /// expansion.
    pub async fn expand(&self, reference: VariablesReference) -> DebugResult<Vec<Variable>> {
        if !reference.is_expandable() {
            return Ok(Vec::new());
        }
        let transport = self.require_transport()?;
        self.check_reference(reference)?;
        let body: VariablesResponseBody = transport
            .request(
                "variables",
                &VariablesArguments {
                    variables_reference: reference.raw(),
                },
            )
            .await?;

        let generation = reference.generation();
        let mut runtime = self.inner.runtime.lock();
        if runtime.generation != generation {
            return Err(stale_reference(reference));
        }
        let variables: Vec<Variable> = body
            .variables
            .into_iter()
            .map(|variable| Variable::from_protocol(variable, generation))
            .collect();
        runtime.stop.references.extend(
            variables
                .iter()
                .filter(|variable| variable.reference.is_expandable())
                .map(|variable| variable.reference.raw()),
        );
        Ok(variables)
    }

    /// Load the variables of scope `index` of a cached frame. The cache is
    /// updated, and so is the variables model when that frame is shown.
    pub async fn expand_scope(&self, frame_id: u32, index: usize) -> DebugResult<Vec<Variable>> {
        let scope = {
            let runtime = self.inner.runtime.lock();
            runtime
                .stop
                .frames
                .get(&frame_id)
                .and_then(|snapshot| snapshot.scopes.get(index))
                .cloned()
                .ok_or_else(|| {
                    DebugError::protocol(format!(
                        "scope {index} of frame {frame_id} is not part of the current stop"
                    ))
                })?
        };
        if let Some(variables) = scope.variables {
            return Ok(variables);
        }
        let variables = self.expand(scope.reference).await?;

        let model = self.model();
        let mut guard = self.inner.runtime.lock();
        let runtime = &mut *guard;
        if runtime.generation != scope.reference.generation() {
            return Err(stale_reference(scope.reference));
        }
        let Some(snapshot) = runtime.stop.frames.get_mut(&frame_id) else {
            return Ok(variables);
        };
        if let Some(cached) = snapshot.scopes.get_mut(index) {
            cached.variables = Some(variables.clone());
        }
        if runtime.stop.shown_frame == Some(frame_id) {
            if let Some(model) = model {
                model.variables.set_scopes(snapshot.scopes.clone());
            }
        }
        Ok(variables)
    }

    /// Content for `path`: the registered provider first, then the engine's
    /// `source` request. Failures yield `None`.
    pub async fn get_source(&self, path: &str) -> Option<SourceContent> {
        let provider = self.inner.source_provider.lock().clone();
        if let Some(content) = provider.and_then(|provider| provider.source(path)) {
            return Some(content);
        }
        let transport = self.require_transport().ok()?;
        let arguments = SourceArguments {
            source: Source::from_path(path),
            source_reference: 0,
        };
        match transport
            .request::<_, SourceResponseBody>("source", &arguments)
            .await
        {
            Ok(body) => Some(SourceContent {
                content: body.content,
                mime_type: body
                    .mime_type
                    .unwrap_or_else(|| mime_type_for_path(path).to_string()),
            }),
            Err(err) => {
                debug!(path, "source unavailable: {err}");
                None
            }
        }
    }

    fn check_reference(&self, reference: VariablesReference) -> DebugResult<()> {
        let runtime = self.inner.runtime.lock();
        if runtime.generation != reference.generation()
            || !runtime.stop.references.contains(&reference.raw())
        {
            return Err(stale_reference(reference));
        }
        Ok(())
    }
}

fn stale_reference(reference: VariablesReference) -> DebugError {
    DebugError::protocol(format!(
        "variables reference {} belongs to a previous stop",
        reference.raw()
    ))
}
