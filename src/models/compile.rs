use serde::{Deserialize, Serialize};

/// Body posted to the compilation service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompileRequest {
    pub code: String,
    pub language: String,
}
