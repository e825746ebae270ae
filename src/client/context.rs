//! Session context: the state shared by the membership and document
//! controllers for the lifetime of one room session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::client::editor::LanguageMode;

#[derive(Debug)]
struct SessionState {
    room_id: String,
    display_name: String,
    connection_id: String,
    code: Option<String>,
    language: LanguageMode,
    active: bool,
}

/// Cheap to clone; every clone sees the same state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionContext {
    pub fn new(
        room_id: impl Into<String>,
        display_name: impl Into<String>,
        connection_id: impl Into<String>,
        language: LanguageMode,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                room_id: room_id.into(),
                display_name: display_name.into(),
                connection_id: connection_id.into(),
                code: None,
                language,
                active: true,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn room_id(&self) -> String {
        self.state().room_id.clone()
    }

    pub fn display_name(&self) -> String {
        self.state().display_name.clone()
    }

    pub fn connection_id(&self) -> String {
        self.state().connection_id.clone()
    }

    /// Latest known document text; `None` until a document is mounted or
    /// received.
    pub fn code(&self) -> Option<String> {
        self.state().code.clone()
    }

    pub fn set_code(&self, code: impl Into<String>) {
        self.state().code = Some(code.into());
    }

    pub fn language(&self) -> LanguageMode {
        self.state().language.clone()
    }

    pub fn set_language(&self, language: LanguageMode) {
        self.state().language = language;
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// Returns false if the context was already disposed.
    pub fn dispose(&self) -> bool {
        let mut state = self.state();
        std::mem::replace(&mut state.active, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let ctx = SessionContext::new("R1", "alice", "c1", LanguageMode::default());
        let other = ctx.clone();
        assert_eq!(ctx.code(), None);

        other.set_code("let x = 1;");
        other.set_language(LanguageMode::new("python"));
        assert_eq!(ctx.code().as_deref(), Some("let x = 1;"));
        assert_eq!(ctx.language().as_str(), "python");
    }

    #[test]
    fn dispose_only_once() {
        let ctx = SessionContext::new("R1", "alice", "c1", LanguageMode::default());
        assert!(ctx.is_active());
        assert!(ctx.dispose());
        assert!(!ctx.dispose());
        assert!(!ctx.is_active());
    }
}
