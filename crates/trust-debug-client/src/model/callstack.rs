//! Call stack model: current frames plus the active frame.

use parking_lot::Mutex;

use crate::protocol::StackFrame;
use crate::signal::{Signal, Subscription};

#[derive(Debug, Default)]
struct CallstackState {
    frames: Vec<StackFrame>,
    frame: Option<StackFrame>,
}

#[derive(Debug, Default)]
pub struct CallstackModel {
    state: Mutex<CallstackState>,
    frames_changed: Signal<Vec<StackFrame>>,
    current_frame_changed: Signal<Option<StackFrame>>,
}

impl CallstackModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn frames(&self) -> Vec<StackFrame> {
        self.state.lock().frames.clone()
    }

    #[must_use]
    pub fn frame(&self) -> Option<StackFrame> {
        self.state.lock().frame.clone()
    }

    /// Replace the frame list. The active frame survives when its id is still
    /// listed, otherwise it falls back to the first frame (or none).
    pub fn set_frames(&self, frames: Vec<StackFrame>) {
        let (previous_id, active) = {
            let mut state = self.state.lock();
            let previous_id = state.frame.as_ref().map(|frame| frame.id);
            let active = previous_id
                .and_then(|id| frames.iter().find(|frame| frame.id == id))
                .or_else(|| frames.first())
                .cloned();
            state.frames = frames.clone();
            state.frame = active.clone();
            (previous_id, active)
        };
        self.frames_changed.emit(frames);
        if previous_id != active.as_ref().map(|frame| frame.id) {
            self.current_frame_changed.emit(active);
        }
    }

    /// Set the active frame without consulting the frame list.
    pub fn set_frame(&self, frame: Option<StackFrame>) {
        self.state.lock().frame = frame.clone();
        self.current_frame_changed.emit(frame);
    }

    pub fn frames_changed(&self) -> &Signal<Vec<StackFrame>> {
        &self.frames_changed
    }

    pub fn current_frame_changed(&self) -> &Signal<Option<StackFrame>> {
        &self.current_frame_changed
    }

    pub fn subscribe_current_frame(&self) -> Subscription<Option<StackFrame>> {
        self.current_frame_changed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::CallstackModel;
    use crate::protocol::StackFrame;

    fn frame(id: u32, line: u32) -> StackFrame {
        StackFrame {
            id,
            name: format!("frame{id}"),
            source: None,
            line,
            column: 1,
            end_line: None,
            end_column: None,
        }
    }

    #[test]
    fn active_frame_follows_replacement_rules() {
        let model = CallstackModel::new();
        let mut active_changes = model.subscribe_current_frame();
        let mut frame_changes = model.frames_changed().subscribe();

        model.set_frames(vec![frame(1, 3), frame(2, 10)]);
        assert_eq!(model.frame().map(|f| f.id), Some(1));

        model.set_frame(Some(frame(2, 10)));
        model.set_frames(vec![frame(2, 11), frame(3, 20)]);
        assert_eq!(model.frame(), Some(frame(2, 11)));

        model.set_frames(vec![frame(7, 5)]);
        assert_eq!(model.frame().map(|f| f.id), Some(7));

        model.set_frames(Vec::new());
        assert_eq!(model.frame(), None);

        let frame_events = std::iter::from_fn(|| frame_changes.try_recv()).count();
        assert_eq!(frame_events, 4);
        let active_events: Vec<_> = std::iter::from_fn(|| active_changes.try_recv())
            .map(|frame| frame.map(|f| f.id))
            .collect();
        assert_eq!(active_events, vec![Some(1), Some(2), Some(7), None]);
    }

    #[test]
    fn unchanged_active_identity_is_not_renotified() {
        let model = CallstackModel::new();
        model.set_frames(vec![frame(1, 3)]);
        let mut active_changes = model.subscribe_current_frame();

        model.set_frames(vec![frame(1, 4), frame(2, 9)]);
        assert!(active_changes.try_recv().is_none());
        assert_eq!(model.frame().map(|f| f.line), Some(4));
    }

    #[test]
    fn direct_assignment_skips_lookup() {
        let model = CallstackModel::new();
        model.set_frames(vec![frame(1, 3)]);
        model.set_frame(Some(frame(42, 1)));
        assert_eq!(model.frame().map(|f| f.id), Some(42));
        assert_eq!(model.frames().len(), 1);
    }
}
