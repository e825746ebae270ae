//! Client core: connection manager, membership and document sync controllers,
//! and the room session that owns them.

pub mod connection;
pub mod context;
pub mod document;
pub mod editor;
pub mod handlers;
pub mod membership;
pub mod session;

pub use connection::{Connection, ConnectionManager, ReconnectPolicy, RemoteEnd};
pub use context::SessionContext;
pub use document::DocumentSyncController;
pub use editor::{ChangeOrigin, EditorSurface, LanguageMode, SurfaceFactory, TextBufferFactory};
pub use membership::{MembershipController, MembershipNotice, MembershipState};
pub use session::{generate_room_id, RoomSession};
