//! Breakpoint intents and engine synchronisation.
//! - toggle_breakpoint/update_breakpoints: user-facing edits
//! - dump_cell: register code with the engine
//! - flush_*: push intended sets through `setBreakpoints`
//! - ensure_configured: one `configurationDone` per session lifetime

use tracing::{debug, warn};

use crate::error::DebugResult;
use crate::protocol::{
    DumpCellArguments, DumpCellResponseBody, SetBreakpointsArguments, SetBreakpointsResponseBody,
    Source, SourceBreakpoint,
};
use crate::source_id::SourceIdentity;

use super::DebugController;

impl DebugController {
    /// Toggle the breakpoint at `line`, flushing the source when live.
    /// Returns whether a breakpoint exists at `line` afterwards.
    pub async fn toggle_breakpoint(&self, source: &SourceIdentity, line: u32) -> DebugResult<bool> {
        let model = self.require_model()?;
        let present = model.breakpoints.toggle(source, line);
        if self.is_started() {
            self.flush_source(source).await?;
            self.ensure_configured().await?;
        }
        Ok(present)
    }

    /// Replace the breakpoints of `code` with `lines`. When live, the code is
    /// registered and the new set flushed.
    pub async fn update_breakpoints(&self, code: &str, lines: &[u32]) -> DebugResult<SourceIdentity> {
        let model = self.require_model()?;
        let source = self.inner.registry.identify(code);
        let live = self.is_started();
        if live {
            self.dump_cell(code).await?;
        }
        let specs: Vec<SourceBreakpoint> =
            lines.iter().copied().map(SourceBreakpoint::at_line).collect();
        model.breakpoints.set_breakpoints(&source, &specs);
        if live {
            self.flush_source(&source).await?;
            self.ensure_configured().await?;
        }
        Ok(source)
    }

    /// Send `code` to the engine so frames can refer to it by identity.
    pub async fn dump_cell(&self, code: &str) -> DebugResult<SourceIdentity> {
        let transport = self.require_transport()?;
        let local = self.inner.registry.identify(code);
        let reply: DumpCellResponseBody = transport
            .request(
                "dumpCell",
                &DumpCellArguments {
                    code: code.to_string(),
                },
            )
            .await?;
        if reply.source_path != local.as_str() {
            warn!(
                local = %local,
                engine = %reply.source_path,
                "engine source path differs from local identity"
            );
        }
        Ok(local)
    }

    /// Send the active set of `source` and fold the acknowledgement back in,
    /// unless the set changed while the request was in flight.
    pub(super) async fn flush_source(&self, source: &SourceIdentity) -> DebugResult<()> {
        let Some(model) = self.model() else {
            return Ok(());
        };
        let transport = self.require_transport()?;
        let lines = model.breakpoints.active_lines(source);
        let arguments = SetBreakpointsArguments {
            source: Source::from_path(source.as_str()),
            breakpoints: Some(lines.iter().copied().map(SourceBreakpoint::at_line).collect()),
            lines: None,
            source_modified: Some(false),
        };
        let reply: SetBreakpointsResponseBody =
            transport.request("setBreakpoints", &arguments).await?;
        if model.breakpoints.active_lines(source) == lines {
            model.breakpoints.update_from_ack(source, &reply.breakpoints);
        } else {
            debug!(source = %source, "breakpoints changed during flush; acknowledgement dropped");
        }
        debug!(source = %source, count = reply.breakpoints.len(), "breakpoints flushed");
        Ok(())
    }

    pub(super) async fn flush_all(&self) -> DebugResult<()> {
        let Some(model) = self.model() else {
            return Ok(());
        };
        for source in model.breakpoints.sources() {
            self.flush_source(&source).await?;
        }
        Ok(())
    }

    pub(super) async fn flush_pending(&self) -> DebugResult<()> {
        let Some(model) = self.model() else {
            return Ok(());
        };
        for source in model.breakpoints.sources_needing_flush() {
            self.flush_source(&source).await?;
        }
        Ok(())
    }

    /// Send `configurationDone` once per session lifetime, when supported.
    pub(super) async fn ensure_configured(&self) -> DebugResult<()> {
        let transport = {
            let mut runtime = self.inner.runtime.lock();
            if runtime.configured {
                return Ok(());
            }
            let Some(transport) = runtime.transport.clone() else {
                return Ok(());
            };
            runtime.configured = true;
            if runtime.capabilities.supports_configuration_done_request == Some(false) {
                return Ok(());
            }
            transport
        };
        if let Err(err) = transport.send_request("configurationDone", None).await {
            self.inner.runtime.lock().configured = false;
            return Err(err);
        }
        debug!("configuration done");
        Ok(())
    }

    pub(super) fn is_configured(&self) -> bool {
        self.inner.runtime.lock().configured
    }
}
