use garde::Validate;
use serde::{Deserialize, Serialize};

/// Search request handed to the search worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[garde(length(min = 1, max = 500))]
    pub query: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 200))]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 100))]
    pub limit: Option<u32>,
}
