//! Session lifecycle.
//! - set_session/set_model: replace collaborators and notify
//! - start: connect, handshake, spawn the event loop
//! - stop/teardown: disconnect and release the transport
//! - restart: stop, start, re-flush breakpoints
//! - restore_state: adopt the engine's view via `debugInfo`

use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{DebugError, DebugResult};
use crate::model::{Breakpoint, DebuggerModel};
use crate::protocol::{
    Capabilities, DebugInfoResponseBody, DisconnectArguments, InitializeArguments,
};
use crate::session::DebugSession;
use crate::source_id::{IdentityFormat, SourceIdentity};
use crate::transport::Transport;

use super::{events, DebugController, SessionState};

impl DebugController {
    /// Replace the session. A live transport of the previous session is
    /// released first.
    pub fn set_session(&self, session: Option<Arc<DebugSession>>) {
        {
            let current = self.inner.session.lock();
            let same = match (current.as_ref(), session.as_ref()) {
                (Some(current), Some(next)) => Arc::ptr_eq(current, next),
                (None, None) => true,
                _ => false,
            };
            if same {
                return;
            }
        }
        self.teardown(None);
        *self.inner.session.lock() = session.clone();
        {
            let mut runtime = self.inner.runtime.lock();
            self.transition(&mut runtime, SessionState::Idle);
        }
        self.inner.session_changed.emit(session);
    }

    /// Replace the model. When stopped, the cached stop is republished into
    /// the new model.
    pub fn set_model(&self, model: Option<Arc<DebuggerModel>>) {
        *self.inner.model.lock() = model.clone();
        self.republish_stop();
        self.inner.model_changed.emit(model);
    }

    /// True while a transport is open and the handshake has completed.
    #[must_use]
    pub fn is_started(&self) -> bool {
        let runtime = self.inner.runtime.lock();
        runtime.transport.as_ref().is_some_and(Transport::is_open)
            && matches!(
                runtime.state,
                SessionState::Started | SessionState::Running | SessionState::Stopped
            )
    }

    /// True iff a model is attached and the engine is stopped with the stop
    /// published.
    #[must_use]
    pub fn has_stopped_threads(&self) -> bool {
        self.model().is_some() && self.state() == SessionState::Stopped
    }

    /// Connect and perform the capability handshake. Without a session the
    /// call fails with a configuration error and the state is unchanged.
    pub async fn start(&self) -> DebugResult<()> {
        let session = self
            .session()
            .ok_or_else(|| DebugError::configuration("no active session"))?;
        if self.is_started() {
            return Ok(());
        }

        let (transport, events) = session.connect()?;
        let epoch = {
            let mut runtime = self.inner.runtime.lock();
            runtime.epoch += 1;
            runtime.generation += 1;
            runtime.transport = Some(transport.clone());
            runtime.capabilities = Capabilities::default();
            runtime.thread_id = None;
            runtime.configured = false;
            runtime.stop = Default::default();
            if let Ok(handle) = Handle::try_current() {
                runtime.handle = Some(handle);
            }
            runtime.epoch
        };
        tokio::spawn(events::run_event_loop(
            Arc::downgrade(&self.inner),
            epoch,
            events,
        ));

        let arguments = InitializeArguments {
            client_id: Some(self.inner.options.client_id.clone()),
            client_name: Some(self.inner.options.client_id.clone()),
            adapter_id: self.inner.options.adapter_id.clone(),
            lines_start_at1: Some(true),
            columns_start_at1: Some(true),
            path_format: Some("path".to_string()),
            supports_variable_type: Some(true),
        };
        let capabilities = match transport
            .request_or_default::<_, Capabilities>("initialize", &arguments)
            .await
        {
            Ok(capabilities) => capabilities,
            Err(err) => {
                warn!("debug handshake failed: {err}");
                self.teardown(Some(epoch));
                return Err(err);
            }
        };

        let mut runtime = self.inner.runtime.lock();
        if runtime.epoch != epoch {
            return Err(DebugError::Disposed);
        }
        runtime.capabilities = capabilities;
        self.transition(&mut runtime, SessionState::Started);
        info!(epoch, adapter = %self.inner.options.adapter_id, "debug session started");
        Ok(())
    }

    /// Disconnect from the engine and release the transport. Breakpoint
    /// intents survive; their engine ids do not.
    pub async fn stop(&self) -> DebugResult<()> {
        let (transport, epoch) = {
            let runtime = self.inner.runtime.lock();
            (runtime.transport.clone(), runtime.epoch)
        };
        let Some(transport) = transport else {
            return Ok(());
        };
        let arguments = DisconnectArguments {
            restart: Some(false),
            terminate_debuggee: Some(true),
        };
        match serde_json::to_value(&arguments) {
            Ok(arguments) => {
                if let Err(err) = transport.send_request("disconnect", Some(arguments)).await {
                    debug!("disconnect request failed: {err}");
                }
            }
            Err(err) => debug!("failed to encode disconnect: {err}"),
        }
        self.teardown(Some(epoch));
        Ok(())
    }

    /// Tear down and re-establish the transport, then re-flush every
    /// breakpoint. Engine ids are reassigned.
    pub async fn restart(&self) -> DebugResult<()> {
        if self.session().is_none() {
            return Err(DebugError::configuration("no active session"));
        }
        let previous = {
            let mut runtime = self.inner.runtime.lock();
            let previous = runtime.state;
            self.transition(&mut runtime, SessionState::Restarting);
            previous
        };
        self.stop().await?;
        if let Err(err) = self.start().await {
            // Nothing was torn down when no transport was open.
            let mut runtime = self.inner.runtime.lock();
            if runtime.state == SessionState::Restarting {
                self.transition(&mut runtime, previous);
            }
            return Err(err);
        }
        self.flush_all().await?;
        self.ensure_configured().await?;
        info!("debug session restarted");
        Ok(())
    }

    /// Adopt the engine's state: identity format, breakpoints and stopped
    /// threads. With `auto_start`, an idle controller is started first.
    pub async fn restore_state(&self, auto_start: bool) -> DebugResult<()> {
        let model = self.require_model()?;
        if !self.is_started() {
            if !auto_start {
                return Ok(());
            }
            self.start().await?;
        }
        let transport = self.require_transport()?;
        let info: DebugInfoResponseBody = transport
            .request_or_default("debugInfo", &Value::Object(Default::default()))
            .await?;

        let format = IdentityFormat {
            prefix: info.tmp_file_prefix.clone().unwrap_or_default(),
            suffix: info.tmp_file_suffix.clone().unwrap_or_default(),
        };
        if format != self.inner.registry.format() {
            debug!(
                prefix = %format.prefix,
                suffix = %format.suffix,
                hash_method = ?info.hash_method,
                "adopting engine source identity format"
            );
            self.inner.registry.set_format(format);
        }

        if !info.breakpoints.is_empty() {
            let restored = info
                .breakpoints
                .iter()
                .map(|entry| {
                    let source = SourceIdentity::new(&entry.source);
                    let breakpoints = entry
                        .breakpoints
                        .iter()
                        .filter_map(|breakpoint| {
                            Some(Breakpoint {
                                id: breakpoint.id,
                                line: breakpoint.line?,
                                active: true,
                                verified: breakpoint.verified,
                                source: source.clone(),
                            })
                        })
                        .collect();
                    (source, breakpoints)
                })
                .collect();
            model.breakpoints.restore_breakpoints(restored);
        }

        if let Some(&thread_id) = info.stopped_threads.first() {
            debug!(thread_id, "engine reports a stopped thread");
            self.begin_stop(thread_id);
        }
        Ok(())
    }

    /// Release the transport and mark the session terminated. With an epoch,
    /// only that session lifetime is torn down. Returns whether anything was
    /// released.
    pub(super) fn teardown(&self, epoch: Option<u64>) -> bool {
        let (transport, follower) = {
            let mut runtime = self.inner.runtime.lock();
            if epoch.is_some_and(|epoch| epoch != runtime.epoch) || runtime.transport.is_none() {
                return false;
            }
            runtime.epoch += 1;
            runtime.generation += 1;
            runtime.configured = false;
            runtime.thread_id = None;
            runtime.stop = Default::default();
            self.transition(&mut runtime, SessionState::Terminated);
            (runtime.transport.take(), runtime.follower.take())
        };
        if let Some(follower) = follower {
            follower.abort();
        }
        if let Some(transport) = transport {
            transport.dispose();
        }
        if let Some(session) = self.session() {
            session.disconnect();
        }
        if let Some(model) = self.model() {
            model.clear_stop_state();
            model.breakpoints.invalidate();
        }
        info!("debug session terminated");
        true
    }
}
