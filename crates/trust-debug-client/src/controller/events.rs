//! Engine event loop.

use std::sync::Weak;

use tracing::{debug, info};

use crate::protocol::EngineEvent;
use crate::signal::Subscription;

use super::{ControllerInner, DebugController};

/// Process events of one session lifetime in arrival order. Exits when the
/// controller is dropped, the epoch moves on, or the channel closes.
pub(super) async fn run_event_loop(
    inner: Weak<ControllerInner>,
    epoch: u64,
    mut events: Subscription<EngineEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let controller = DebugController { inner };
        if controller.inner.runtime.lock().epoch != epoch {
            return;
        }
        controller.handle_event(epoch, event);
    }
    if let Some(inner) = inner.upgrade() {
        let controller = DebugController { inner };
        if controller.teardown(Some(epoch)) {
            info!(epoch, "engine channel closed");
        }
    }
}

impl DebugController {
    fn handle_event(&self, epoch: u64, event: EngineEvent) {
        debug!(epoch, event = event.name(), "engine event");
        match event {
            EngineEvent::Initialized => {}
            EngineEvent::Thread(body) => {
                let mut runtime = self.inner.runtime.lock();
                match body.reason.as_str() {
                    "started" => runtime.thread_id = Some(body.thread_id),
                    "exited" if runtime.thread_id == Some(body.thread_id) => {
                        runtime.thread_id = None;
                    }
                    _ => {}
                }
            }
            EngineEvent::Stopped(body) => {
                let thread_id = body.thread_id.unwrap_or_else(|| self.current_thread());
                debug!(thread_id, reason = %body.reason, "engine stopped");
                self.begin_stop(thread_id);
            }
            EngineEvent::Continued(body) => {
                debug!(thread_id = body.thread_id, "engine continued");
                self.enter_running();
            }
            EngineEvent::Terminated(_) | EngineEvent::Exited(_) => {
                self.teardown(Some(epoch));
            }
            EngineEvent::Breakpoint(body) => {
                if let Some(model) = self.model() {
                    if !model.breakpoints.apply_event(&body.breakpoint) {
                        debug!(reason = %body.reason, "breakpoint event for unknown id");
                    }
                }
            }
            EngineEvent::Output(body) => {
                let category = body.category.as_deref().unwrap_or("console");
                info!(category, "{}", body.output.trim_end());
            }
        }
    }
}
