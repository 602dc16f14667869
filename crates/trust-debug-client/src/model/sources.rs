//! Source shown for the paused location.
//! - SourceProvider: external lookup of code by path
//! - SourcesModel: the current source plus change notifications

use std::path::Path;

use parking_lot::Mutex;

use crate::signal::{Signal, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContent {
    pub content: String,
    pub mime_type: String,
}

/// Maps a source path to its content. Lookups that fail return `None`.
pub trait SourceProvider: Send + Sync {
    fn source(&self, path: &str) -> Option<SourceContent>;
}

impl<F> SourceProvider for F
where
    F: Fn(&str) -> Option<SourceContent> + Send + Sync,
{
    fn source(&self, path: &str) -> Option<SourceContent> {
        self(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentSource {
    pub path: String,
    pub content: String,
    pub mime_type: String,
    pub line: u32,
}

#[derive(Debug, Default)]
pub struct SourcesModel {
    current: Mutex<Option<CurrentSource>>,
    changed: Signal<Option<CurrentSource>>,
}

impl SourcesModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> Option<CurrentSource> {
        self.current.lock().clone()
    }

    pub fn set_current(&self, source: Option<CurrentSource>) {
        *self.current.lock() = source.clone();
        self.changed.emit(source);
    }

    pub fn changed(&self) -> &Signal<Option<CurrentSource>> {
        &self.changed
    }

    pub fn subscribe(&self) -> Subscription<Option<CurrentSource>> {
        self.changed.subscribe()
    }
}

/// Best-effort mime type guess from a path's extension.
#[must_use]
pub fn mime_type_for_path(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|ext| ext.to_str()) {
        Some("py") => "text/x-python",
        Some("rs") => "text/x-rust",
        Some("st") => "text/x-structured-text",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::{mime_type_for_path, SourceContent, SourceProvider, SourcesModel};

    #[test]
    fn closures_act_as_providers() {
        let provider = |path: &str| {
            (path == "/tmp/a.py").then(|| SourceContent {
                content: "x = 1".to_string(),
                mime_type: mime_type_for_path(path).to_string(),
            })
        };
        assert_eq!(
            provider.source("/tmp/a.py").map(|source| source.mime_type),
            Some("text/x-python".to_string())
        );
        assert!(provider.source("/tmp/missing.py").is_none());
        assert_eq!(mime_type_for_path("/tmp/a"), "text/plain");
    }

    #[test]
    fn clearing_notifies_subscribers() {
        let model = SourcesModel::new();
        let mut changes = model.subscribe();
        model.set_current(None);
        assert_eq!(changes.try_recv(), Some(None));
        assert!(model.current().is_none());
    }
}
