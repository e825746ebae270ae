//! Room session: the single entry point that wires a connection, the session
//! context and both controllers together, and tears them down as one.

use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::client::connection::{Connection, ConnectionManager};
use crate::client::context::SessionContext;
use crate::client::document::DocumentSyncController;
use crate::client::editor::{LanguageMode, SurfaceFactory};
use crate::client::membership::{MembershipController, MembershipNotice, MembershipState};
use crate::clients::compile_client::CompileClient;
use crate::error::SessionError;
use crate::models::{Event, Member, PingMessage};

/// Fresh id for a new room.
pub fn generate_room_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct RoomSession {
    connection: Connection,
    ctx: SessionContext,
    membership: MembershipController,
    document: DocumentSyncController,
}

impl RoomSession {
    /// Connect (retrying per the manager's policy), mount an empty document and
    /// join `room_id`.
    pub async fn enter(
        manager: &ConnectionManager,
        room_id: &str,
        display_name: &str,
        language: LanguageMode,
        factory: Box<dyn SurfaceFactory>,
    ) -> Result<Self, SessionError> {
        validate_join(room_id, display_name)?;
        let connection = manager.connect_with_retry().await?;
        Self::attach(connection, room_id, display_name, language, factory)
    }

    /// Start a session over an already established connection.
    pub fn attach(
        mut connection: Connection,
        room_id: &str,
        display_name: &str,
        language: LanguageMode,
        factory: Box<dyn SurfaceFactory>,
    ) -> Result<Self, SessionError> {
        validate_join(room_id, display_name)?;
        let ctx = SessionContext::new(room_id.trim(), display_name.trim(), connection.id(), language);

        let document = DocumentSyncController::mount(
            &mut connection,
            ctx.clone(),
            "",
            factory,
            Box::new(|code, origin| trace!("Document changed ({:?}, {} bytes)", origin, code.len())),
        );
        let mut membership = MembershipController::new(ctx.clone());
        membership.join(&mut connection)?;

        info!("Entered room {} as {} ({})", ctx.room_id(), ctx.display_name(), ctx.connection_id());
        Ok(Self {
            connection,
            ctx,
            membership,
            document,
        })
    }

    /// Wait for one event and dispatch it. Returns false once the session has
    /// ended.
    pub async fn pump(&mut self) -> bool {
        if !self.ctx.is_active() {
            return false;
        }
        self.connection.next_event().await;
        self.after_dispatch();
        self.ctx.is_active()
    }

    pub fn dispatch_pending(&mut self) -> usize {
        if !self.ctx.is_active() {
            return 0;
        }
        let processed = self.connection.dispatch_pending();
        self.after_dispatch();
        processed
    }

    // A lost connection ends the session; notices stay readable.
    fn after_dispatch(&mut self) {
        if self.membership.is_connection_lost() {
            self.leave();
        }
    }

    /// Replace the document with `text` as a local edit.
    pub fn type_text(&self, text: &str) -> bool {
        self.document.local_edit(&self.connection, text)
    }

    pub fn set_language(&self, mode: LanguageMode) -> bool {
        self.document.set_language(mode)
    }

    pub fn ping(&self) {
        self.connection.send(Event::Ping, &PingMessage::default());
    }

    pub fn members(&self) -> Vec<Member> {
        self.membership.members()
    }

    pub fn membership_state(&self) -> MembershipState {
        self.membership.state()
    }

    pub fn take_notices(&self) -> Vec<MembershipNotice> {
        self.membership.take_notices()
    }

    /// Text on the surface, or the last known text after the session ended.
    pub fn document_text(&self) -> Option<String> {
        self.document.value().or_else(|| self.ctx.code())
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn is_active(&self) -> bool {
        self.ctx.is_active()
    }

    /// Submit the current document in the current mode and return the text to
    /// show as program output.
    pub async fn run_code(&self, client: &CompileClient) -> String {
        let code = self.ctx.code().unwrap_or_default();
        let language = self.ctx.language();
        client.submit_for_display(&code, language.as_str()).await
    }

    /// Tear everything down. Idempotent.
    pub fn leave(&mut self) -> bool {
        if !self.ctx.is_active() {
            return false;
        }
        self.membership.leave(&mut self.connection);
        self.document.unmount(&mut self.connection);
        self.connection.disconnect();
        self.ctx.dispose();
        info!("Left room {}", self.ctx.room_id());
        true
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if self.leave() {
            debug!("Room session dropped without leave()");
        }
    }
}

fn validate_join(room_id: &str, display_name: &str) -> Result<(), SessionError> {
    if room_id.trim().is_empty() {
        return Err(SessionError::InvalidJoin("roomId"));
    }
    if display_name.trim().is_empty() {
        return Err(SessionError::InvalidJoin("displayName"));
    }
    Ok(())
}
