use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A live connection inside a room.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub connection_id: String,
    pub display_name: String,
}

impl Member {
    pub fn new(connection_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            display_name: display_name.into(),
        }
    }
}
