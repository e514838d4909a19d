//! Request and response records for the HTTP surface.
//!
//! Every response is either the standard `{success, message, data}` envelope
//! or one of the explicitly shaped payloads (health, info, search, directory
//! status).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Permission;
use crate::search::{SearchHit, SearchType};

/// Standard response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_days: Option<i64>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Body for login and validate-key.
#[derive(Debug, Deserialize)]
pub struct KeyCredentialRequest {
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct AddDirectoryQuery {
    pub path: String,
}

fn default_limit() -> usize {
    10
}

fn default_threshold() -> f32 {
    0.3
}

fn default_search_type() -> SearchType {
    SearchType::Keyword
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_search_type")]
    pub search_type: SearchType,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub source_id: String,
    pub display_name: String,
    pub snippet: String,
    pub score: f32,
    pub file_type: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

impl From<SearchHit> for SearchResultItem {
    fn from(hit: SearchHit) -> Self {
        Self {
            source_id: hit.source_id,
            display_name: hit.display_name,
            snippet: hit.snippet,
            score: hit.score,
            file_type: hit.file_type,
            size_bytes: hit.size_bytes,
            last_modified: hit.last_modified,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub search_type: SearchType,
    pub results: Vec<SearchResultItem>,
    pub total_results: usize,
    pub search_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct DirectoryStatusResponse {
    pub path: String,
    pub status: String,
    pub progress: f64,
    pub total_files: usize,
    pub indexed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
