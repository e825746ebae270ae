//! Document sync controller: binds one editing surface to the room's
//! `CODE_CHANGE` stream.
//!
//! Every mutation of the surface, local or remote, funnels through a single
//! change handler. Only changes tagged [`ChangeOrigin::Local`] are broadcast,
//! which is the whole of echo suppression.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::connection::{Connection, Outbox};
use crate::client::context::SessionContext;
use crate::client::editor::{ChangeEvent, ChangeOrigin, EditorSurface, LanguageMode, SurfaceFactory};
use crate::client::handlers::HandlerId;
use crate::models::{decode_payload, CodeChangeMessage, Event};

/// Owner callback, notified of every change with the resulting text.
/// Runs while the controller is locked and must not call back into it.
pub type CodeListener = Box<dyn FnMut(&str, ChangeOrigin) + Send>;

struct DocumentInner {
    ctx: SessionContext,
    surface: Option<Box<dyn EditorSurface>>,
    factory: Box<dyn SurfaceFactory>,
    on_code_change: CodeListener,
}

impl DocumentInner {
    fn handle_change(&mut self, change: ChangeEvent, outbox: Option<&Outbox>) {
        let Some(surface) = self.surface.as_ref() else {
            return;
        };
        let code = surface.value();
        self.ctx.set_code(code.clone());
        (self.on_code_change)(&code, change.origin);

        if change.origin != ChangeOrigin::Local {
            return;
        }
        match outbox {
            Some(outbox) => outbox.send(
                Event::CodeChange,
                &CodeChangeMessage {
                    room_id: Some(self.ctx.room_id()),
                    code: Some(code),
                },
            ),
            None => debug!("Connection closed; local edit not broadcast"),
        }
    }

    fn apply_remote(&mut self, payload: &Value, outbox: &Outbox) {
        let update: CodeChangeMessage = match decode_payload(Event::CodeChange, payload) {
            Ok(update) => update,
            Err(violation) => {
                warn!("Skipping remote update: {}", violation);
                return;
            }
        };
        let Some(code) = update.code else {
            debug!("Ignoring CODE_CHANGE without code");
            return;
        };
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        let change = surface.set_value(&code, ChangeOrigin::Remote);
        self.handle_change(change, Some(outbox));
    }
}

pub struct DocumentSyncController {
    inner: Arc<Mutex<DocumentInner>>,
    subscription: Option<HandlerId>,
}

impl DocumentSyncController {
    /// Mount a surface showing `initial_text` and subscribe to remote updates.
    /// The initial text becomes the known document.
    pub fn mount(
        conn: &mut Connection,
        ctx: SessionContext,
        initial_text: &str,
        mut factory: Box<dyn SurfaceFactory>,
        on_code_change: CodeListener,
    ) -> Self {
        let surface = factory.mount(&ctx.language(), initial_text);
        ctx.set_code(initial_text);
        info!("Mounted {} editor for room {}", ctx.language(), ctx.room_id());

        let inner = Arc::new(Mutex::new(DocumentInner {
            ctx,
            surface: Some(surface),
            factory,
            on_code_change,
        }));

        let remote = inner.clone();
        let subscription = conn.on(
            Event::CodeChange,
            Box::new(move |payload, outbox| {
                lock(&remote).apply_remote(payload, outbox);
            }),
        );

        Self {
            inner,
            subscription: Some(subscription),
        }
    }

    fn inner(&self) -> MutexGuard<'_, DocumentInner> {
        lock(&self.inner)
    }

    /// The user typed; `text` is the surface's full new content.
    /// Returns false when nothing is mounted.
    pub fn local_edit(&self, conn: &Connection, text: &str) -> bool {
        let mut inner = self.inner();
        let Some(surface) = inner.surface.as_mut() else {
            return false;
        };
        let change = surface.set_value(text, ChangeOrigin::Local);
        inner.handle_change(change, conn.outbox());
        true
    }

    /// Re-create the surface in a new mode with the current text.
    pub fn set_language(&self, mode: LanguageMode) -> bool {
        let mut inner = self.inner();
        let Some(mut old) = inner.surface.take() else {
            return false;
        };
        let text = old.value();
        old.release();
        let surface = inner.factory.mount(&mode, &text);
        inner.surface = Some(surface);
        inner.ctx.set_language(mode);
        true
    }

    pub fn value(&self) -> Option<String> {
        self.inner().surface.as_ref().map(|s| s.value())
    }

    pub fn mode(&self) -> Option<LanguageMode> {
        self.inner().surface.as_ref().map(|s| s.mode().clone())
    }

    pub fn is_mounted(&self) -> bool {
        self.inner().surface.is_some()
    }

    /// Stop listening and release the surface. Idempotent.
    pub fn unmount(&mut self, conn: &mut Connection) -> bool {
        if let Some(id) = self.subscription.take() {
            conn.off(Event::CodeChange, id);
        }
        let released = self.inner().surface.take();
        match released {
            Some(mut surface) => {
                surface.release();
                true
            }
            None => false,
        }
    }
}

fn lock(inner: &Mutex<DocumentInner>) -> MutexGuard<'_, DocumentInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::editor::TextBufferFactory;
    use serde_json::json;

    fn setup() -> (
        Connection,
        crate::client::connection::RemoteEnd,
        DocumentSyncController,
        TextBufferFactory,
        Arc<Mutex<Vec<(String, ChangeOrigin)>>>,
    ) {
        let (mut conn, remote) = Connection::detached("a");
        let ctx = SessionContext::new("R1", "alice", "a", LanguageMode::default());
        let factory = TextBufferFactory::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let doc = DocumentSyncController::mount(
            &mut conn,
            ctx,
            "",
            Box::new(factory.clone()),
            Box::new(move |code, origin| log.lock().unwrap().push((code.to_string(), origin))),
        );
        (conn, remote, doc, factory, seen)
    }

    #[tokio::test]
    async fn local_edit_is_broadcast() {
        let (conn, mut remote, doc, _, seen) = setup();
        assert!(doc.local_edit(&conn, "x"));

        let sent = remote.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, Event::CodeChange);
        assert_eq!(sent[0].payload, json!({"roomId": "R1", "code": "x"}));
        assert_eq!(*seen.lock().unwrap(), vec![("x".to_string(), ChangeOrigin::Local)]);
    }

    #[tokio::test]
    async fn remote_update_is_applied_but_not_echoed() {
        let (mut conn, mut remote, doc, _, seen) = setup();
        remote.deliver(Event::CodeChange, &json!({"roomId": "R1", "code": "hello"}));
        assert_eq!(conn.dispatch_pending(), 1);

        assert_eq!(doc.value().as_deref(), Some("hello"));
        assert!(remote.sent().is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![("hello".to_string(), ChangeOrigin::Remote)]);
    }

    #[tokio::test]
    async fn remote_update_without_code_is_ignored() {
        let (mut conn, remote, doc, _, seen) = setup();
        doc.local_edit(&conn, "keep");
        remote.deliver(Event::CodeChange, &json!({"roomId": "R1", "code": null}));
        remote.deliver(Event::CodeChange, &json!({"code": 42}));
        conn.dispatch_pending();

        assert_eq!(doc.value().as_deref(), Some("keep"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn language_switch_keeps_text_and_handler() {
        let (mut conn, mut remote, doc, factory, _) = setup();
        doc.local_edit(&conn, "print(1)");
        assert!(doc.set_language(LanguageMode::new("python")));

        assert_eq!(doc.value().as_deref(), Some("print(1)"));
        assert_eq!(doc.mode().unwrap().as_str(), "python");
        assert_eq!(factory.mounted(), 2);
        assert_eq!(factory.live(), 1);
        assert_eq!(remote.sent().len(), 1);

        remote.deliver(Event::CodeChange, &json!({"code": "print(2)"}));
        conn.dispatch_pending();
        assert_eq!(doc.value().as_deref(), Some("print(2)"));
    }

    #[tokio::test]
    async fn unmount_is_idempotent() {
        let (mut conn, remote, mut doc, factory, seen) = setup();
        assert!(doc.unmount(&mut conn));
        assert!(!doc.unmount(&mut conn));
        assert_eq!(factory.live(), 0);
        assert_eq!(conn.handler_count(), 0);

        remote.deliver(Event::CodeChange, &json!({"code": "late"}));
        conn.dispatch_pending();
        assert!(seen.lock().unwrap().is_empty());
        assert!(!doc.local_edit(&conn, "x"));
    }
}
