//! Breakpoint store keyed by source identity.
//! - set_breakpoints/toggle/set_active: intended state edits
//! - update_from_ack/apply_event: reconcile with engine acknowledgements
//! - restore_breakpoints/snapshot: persisted layout
//! - invalidate: forget session-scoped ids after teardown

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{DebugError, DebugResult};
use crate::protocol::{self, SourceBreakpoint};
use crate::signal::{Signal, Subscription};
use crate::source_id::SourceIdentity;

/// A breakpoint as held by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Engine-assigned id; only meaningful for the current session lifetime.
    pub id: Option<u32>,
    pub line: u32,
    pub active: bool,
    pub verified: bool,
    pub source: SourceIdentity,
}

impl Breakpoint {
    /// An intended, not yet acknowledged breakpoint.
    #[must_use]
    pub fn unverified(source: SourceIdentity, line: u32) -> Self {
        Self {
            id: None,
            line,
            active: true,
            verified: false,
            source,
        }
    }
}

/// Notification emitted whenever the set for one source changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointsChanged {
    pub source: SourceIdentity,
    pub breakpoints: Vec<Breakpoint>,
}

type BreakpointMap = IndexMap<SourceIdentity, Vec<Breakpoint>>;

#[derive(Debug, Default)]
pub struct BreakpointStore {
    state: Mutex<BreakpointMap>,
    changed: Signal<BreakpointsChanged>,
}

impl BreakpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changed(&self) -> &Signal<BreakpointsChanged> {
        &self.changed
    }

    pub fn subscribe(&self) -> Subscription<BreakpointsChanged> {
        self.changed.subscribe()
    }

    /// Replace the intended set for `source`. Lines already present keep
    /// their acknowledged state; duplicate lines collapse to the first.
    pub fn set_breakpoints(&self, source: &SourceIdentity, specs: &[SourceBreakpoint]) {
        self.edit(source, |existing| {
            let mut next: Vec<Breakpoint> = Vec::with_capacity(specs.len());
            for spec in specs {
                if next.iter().any(|breakpoint| breakpoint.line == spec.line) {
                    continue;
                }
                let kept = existing
                    .iter()
                    .find(|breakpoint| breakpoint.line == spec.line)
                    .map(|breakpoint| Breakpoint {
                        active: true,
                        ..breakpoint.clone()
                    });
                next.push(kept.unwrap_or_else(|| Breakpoint::unverified(source.clone(), spec.line)));
            }
            *existing = next;
        });
    }

    /// Fold the engine's acknowledgement of the active set back into the
    /// store. Acknowledgements map positionally onto the active entries;
    /// inactive entries were never sent and stay untouched.
    pub fn update_from_ack(&self, source: &SourceIdentity, acknowledged: &[protocol::Breakpoint]) {
        self.edit(source, |existing| {
            let mut acks = acknowledged.iter();
            for breakpoint in existing.iter_mut().filter(|breakpoint| breakpoint.active) {
                let Some(ack) = acks.next() else {
                    break;
                };
                breakpoint.id = ack.id;
                breakpoint.verified = ack.verified;
                if let Some(line) = ack.line {
                    breakpoint.line = line;
                }
            }
            for ack in acks {
                let Some(line) = ack.line else {
                    continue;
                };
                existing.push(Breakpoint {
                    id: ack.id,
                    line,
                    active: true,
                    verified: ack.verified,
                    source: source.clone(),
                });
            }
        });
    }

    /// Stored breakpoints for `source`, in order; empty for unknown sources.
    #[must_use]
    pub fn get_breakpoints(&self, source: &SourceIdentity) -> Vec<Breakpoint> {
        self.state.lock().get(source).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn sources(&self) -> Vec<SourceIdentity> {
        self.state.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn all(&self) -> BreakpointMap {
        self.state.lock().clone()
    }

    /// Lines the engine should currently hold for `source`.
    #[must_use]
    pub fn active_lines(&self, source: &SourceIdentity) -> Vec<u32> {
        self.state
            .lock()
            .get(source)
            .map(|breakpoints| {
                breakpoints
                    .iter()
                    .filter(|breakpoint| breakpoint.active)
                    .map(|breakpoint| breakpoint.line)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sources holding an active breakpoint the engine has not acknowledged.
    /// An entry the engine assigned an id to counts as acknowledged even when
    /// it could not be verified.
    #[must_use]
    pub fn sources_needing_flush(&self) -> Vec<SourceIdentity> {
        self.state
            .lock()
            .iter()
            .filter(|(_, breakpoints)| {
                breakpoints.iter().any(|breakpoint| {
                    breakpoint.active && breakpoint.id.is_none() && !breakpoint.verified
                })
            })
            .map(|(source, _)| source.clone())
            .collect()
    }

    /// Add a breakpoint at `line`, or remove the one already there.
    /// Returns whether a breakpoint exists at `line` afterwards.
    pub fn toggle(&self, source: &SourceIdentity, line: u32) -> bool {
        let mut present = false;
        self.edit(source, |existing| {
            if let Some(index) = existing.iter().position(|breakpoint| breakpoint.line == line) {
                existing.remove(index);
            } else {
                let at = existing.partition_point(|breakpoint| breakpoint.line < line);
                existing.insert(at, Breakpoint::unverified(source.clone(), line));
                present = true;
            }
        });
        present
    }

    /// Returns `false` when no breakpoint exists at `line`.
    pub fn set_active(&self, source: &SourceIdentity, line: u32, active: bool) -> bool {
        let mut found = false;
        self.edit(source, |existing| {
            if let Some(breakpoint) = existing.iter_mut().find(|breakpoint| breakpoint.line == line) {
                found = true;
                if breakpoint.active != active {
                    breakpoint.active = active;
                    breakpoint.verified = false;
                    breakpoint.id = None;
                }
            }
        });
        found
    }

    pub fn remove_source(&self, source: &SourceIdentity) -> bool {
        let mut removed = false;
        self.edit(source, |existing| {
            removed = !existing.is_empty();
            existing.clear();
        });
        removed
    }

    /// Replace all state at once.
    pub fn restore_breakpoints(&self, snapshot: BreakpointMap) {
        let notifications = {
            let mut state = self.state.lock();
            let mut touched: Vec<SourceIdentity> = state.keys().cloned().collect();
            for source in snapshot.keys() {
                if !touched.contains(source) {
                    touched.push(source.clone());
                }
            }
            let previous = std::mem::take(&mut *state);
            *state = snapshot
                .into_iter()
                .filter(|(_, breakpoints)| !breakpoints.is_empty())
                .collect();
            touched
                .into_iter()
                .filter_map(|source| {
                    let next = state.get(&source).cloned().unwrap_or_default();
                    let before = previous.get(&source).map(Vec::as_slice).unwrap_or_default();
                    (before != next.as_slice()).then_some(BreakpointsChanged {
                        source,
                        breakpoints: next,
                    })
                })
                .collect::<Vec<_>>()
        };
        for notification in notifications {
            self.changed.emit(notification);
        }
    }

    /// Drop every session-scoped id; intended lines and flags persist.
    pub fn invalidate(&self) {
        let notifications = {
            let mut state = self.state.lock();
            state
                .iter_mut()
                .filter_map(|(source, breakpoints)| {
                    let mut changed = false;
                    for breakpoint in breakpoints.iter_mut() {
                        if breakpoint.verified || breakpoint.id.is_some() {
                            breakpoint.verified = false;
                            breakpoint.id = None;
                            changed = true;
                        }
                    }
                    changed.then(|| BreakpointsChanged {
                        source: source.clone(),
                        breakpoints: breakpoints.clone(),
                    })
                })
                .collect::<Vec<_>>()
        };
        for notification in notifications {
            self.changed.emit(notification);
        }
    }

    /// Apply a `breakpoint` event to the entry carrying the same id.
    pub fn apply_event(&self, update: &protocol::Breakpoint) -> bool {
        let Some(id) = update.id else {
            return false;
        };
        let notification = {
            let mut state = self.state.lock();
            state.iter_mut().find_map(|(source, breakpoints)| {
                let breakpoint = breakpoints
                    .iter_mut()
                    .find(|breakpoint| breakpoint.id == Some(id))?;
                breakpoint.verified = update.verified;
                if let Some(line) = update.line {
                    breakpoint.line = line;
                }
                Some(BreakpointsChanged {
                    source: source.clone(),
                    breakpoints: breakpoints.clone(),
                })
            })
        };
        let found = notification.is_some();
        if let Some(notification) = notification {
            self.changed.emit(notification);
        }
        found
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakpointSnapshot {
        let state = self.state.lock();
        BreakpointSnapshot(
            state
                .iter()
                .map(|(source, breakpoints)| {
                    let persisted = breakpoints
                        .iter()
                        .map(|breakpoint| PersistedBreakpoint {
                            line: breakpoint.line,
                            active: breakpoint.active,
                        })
                        .collect();
                    (source.clone(), persisted)
                })
                .collect(),
        )
    }

    /// Run `edit` on the list for `source`, dropping the key when it ends up
    /// empty and notifying only on an actual change.
    fn edit(&self, source: &SourceIdentity, edit: impl FnOnce(&mut Vec<Breakpoint>)) {
        let notification = {
            let mut state = self.state.lock();
            let before = state.get(source).cloned().unwrap_or_default();
            let mut next = before.clone();
            edit(&mut next);
            if next == before {
                None
            } else {
                if next.is_empty() {
                    state.shift_remove(source);
                } else {
                    state.insert(source.clone(), next.clone());
                }
                Some(BreakpointsChanged {
                    source: source.clone(),
                    breakpoints: next,
                })
            }
        };
        if let Some(notification) = notification {
            self.changed.emit(notification);
        }
    }
}

/// Persisted form of one breakpoint: engine-session fields are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedBreakpoint {
    pub line: u32,
    pub active: bool,
}

/// Serializable `source -> breakpoints` layout used to re-seed a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointSnapshot(IndexMap<SourceIdentity, Vec<PersistedBreakpoint>>);

impl BreakpointSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, source: &SourceIdentity) -> Option<&[PersistedBreakpoint]> {
        self.0.get(source).map(Vec::as_slice)
    }

    /// Unverified breakpoints ready for [`BreakpointStore::restore_breakpoints`].
    #[must_use]
    pub fn into_breakpoints(self) -> BreakpointMap {
        self.0
            .into_iter()
            .map(|(source, persisted)| {
                let breakpoints = persisted
                    .into_iter()
                    .map(|entry| Breakpoint {
                        active: entry.active,
                        ..Breakpoint::unverified(source.clone(), entry.line)
                    })
                    .collect();
                (source, breakpoints)
            })
            .collect()
    }

    pub fn to_json(&self) -> DebugResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| DebugError::configuration(format!("failed to encode breakpoints: {err}")))
    }

    pub fn from_json(text: &str) -> DebugResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| DebugError::configuration(format!("invalid breakpoint snapshot: {err}")))
    }
}

impl FromIterator<(SourceIdentity, Vec<PersistedBreakpoint>)> for BreakpointSnapshot {
    fn from_iter<I: IntoIterator<Item = (SourceIdentity, Vec<PersistedBreakpoint>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
