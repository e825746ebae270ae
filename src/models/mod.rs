pub mod compile;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod member;
pub mod messages;
pub mod ready;
pub mod room;

pub use compile::*;
pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use member::*;
pub use messages::*;
pub use ready::*;
pub use room::*;
