//! Editing surface abstraction.
//!
//! The document controller never talks to a concrete editor widget. It mounts
//! a surface through a [`SurfaceFactory`] and pushes every mutation through
//! [`EditorSurface::set_value`], which reports the change back tagged with
//! where it came from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Languages offered by the mode selector.
pub const SUPPORTED_LANGUAGES: &[&str] = &["javascript", "htmlmixed", "python", "xml", "sql", "css", "c", "clike"];

/// Local syntax-mode label. Never sent to peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguageMode(String);

impl LanguageMode {
    /// Unknown labels are kept as given (lowercased) but logged.
    pub fn new(label: impl AsRef<str>) -> Self {
        let label = label.as_ref().trim().to_lowercase();
        if !SUPPORTED_LANGUAGES.contains(&label.as_str()) {
            warn!("Unsupported language mode '{}'", label);
        }
        Self(label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_LANGUAGES.contains(&self.0.as_str())
    }
}

impl Default for LanguageMode {
    fn default() -> Self {
        Self("javascript".to_string())
    }
}

impl std::fmt::Display for LanguageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Typed by the local user.
    Local,
    /// Applied from a network update.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub origin: ChangeOrigin,
}

pub trait EditorSurface: Send {
    fn value(&self) -> String;

    /// Replace the whole text and report the change.
    fn set_value(&mut self, text: &str, origin: ChangeOrigin) -> ChangeEvent;

    fn mode(&self) -> &LanguageMode;

    /// Detach from the host. Called exactly once before the surface is dropped.
    fn release(&mut self);
}

pub trait SurfaceFactory: Send {
    fn mount(&mut self, mode: &LanguageMode, text: &str) -> Box<dyn EditorSurface>;
}

/// In-memory surface used by headless clients and tests.
pub struct TextBuffer {
    text: String,
    mode: LanguageMode,
    live: Option<Arc<AtomicUsize>>,
}

impl TextBuffer {
    pub fn new(mode: LanguageMode, text: &str) -> Self {
        Self {
            text: text.to_string(),
            mode,
            live: None,
        }
    }
}

impl EditorSurface for TextBuffer {
    fn value(&self) -> String {
        self.text.clone()
    }

    fn set_value(&mut self, text: &str, origin: ChangeOrigin) -> ChangeEvent {
        self.text.clear();
        self.text.push_str(text);
        ChangeEvent { origin }
    }

    fn mode(&self) -> &LanguageMode {
        &self.mode
    }

    fn release(&mut self) {
        if let Some(live) = self.live.take() {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Mounts [`TextBuffer`]s and keeps count of them. Clones share the counters.
#[derive(Debug, Clone, Default)]
pub struct TextBufferFactory {
    mounted: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl TextBufferFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surfaces mounted so far.
    pub fn mounted(&self) -> usize {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Surfaces mounted and not yet released.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl SurfaceFactory for TextBufferFactory {
    fn mount(&mut self, mode: &LanguageMode, text: &str) -> Box<dyn EditorSurface> {
        self.mounted.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let mut buffer = TextBuffer::new(mode.clone(), text);
        buffer.live = Some(self.live.clone());
        Box::new(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_mode_is_lowercased() {
        let mode = LanguageMode::new(" Python ");
        assert_eq!(mode.as_str(), "python");
        assert!(mode.is_supported());
        assert!(!LanguageMode::new("brainfuck").is_supported());
        assert_eq!(LanguageMode::default().as_str(), "javascript");
    }

    #[test]
    fn factory_tracks_live_surfaces() {
        let mut factory = TextBufferFactory::new();
        let mut first = factory.mount(&LanguageMode::default(), "a");
        let _second = factory.clone().mount(&LanguageMode::new("css"), "b");
        assert_eq!(factory.mounted(), 2);
        assert_eq!(factory.live(), 2);

        first.release();
        first.release();
        assert_eq!(factory.live(), 1);
    }

    #[test]
    fn set_value_reports_origin() {
        let mut buffer = TextBuffer::new(LanguageMode::default(), "");
        let event = buffer.set_value("x", ChangeOrigin::Remote);
        assert_eq!(event.origin, ChangeOrigin::Remote);
        assert_eq!(buffer.value(), "x");
    }
}
