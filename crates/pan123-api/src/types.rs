//! Wire payloads for the open-platform endpoints
//!
//! Every response arrives wrapped in the [`ApiResponse`] envelope; success
//! is `code == 0`. Field names follow the remote's JSON exactly, which
//! mixes `fileId`, `fileID`, and `parentFileID` between endpoints, so the
//! renames here are deliberate and endpoint-specific.

use serde::{Deserialize, Serialize};

use pan123_core::domain::entry::RemoteEntry;

// ============================================================================
// Envelope
// ============================================================================

/// The `{code, message, data}` envelope on every JSON response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    /// 0 on success
    pub code: i64,
    /// Human-readable status, often in Chinese
    #[serde(default)]
    pub message: String,
    /// Payload; absent or null on failures and some mutations
    #[serde(default = "none")]
    pub data: Option<T>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> ApiResponse<T> {
    /// Whether the remote reported success
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

// ============================================================================
// Token endpoint
// ============================================================================

/// Request body for `POST /api/v1/access_token`
#[derive(Debug, Serialize)]
pub struct TokenRequest {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
}

/// Payload of the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenData {
    /// Bearer token
    #[serde(rename = "accessToken", default)]
    pub access_token: Option<String>,
    /// RFC3339 expiry instant
    #[serde(rename = "expiredAt", default)]
    pub expired_at: Option<String>,
}

// ============================================================================
// Listing / detail / user info
// ============================================================================

/// Payload of `GET /api/v2/file/list`
#[derive(Debug, Clone, Deserialize)]
pub struct FileListData {
    /// Cursor for the next page; -1 terminates
    #[serde(rename = "lastFileId", default = "terminal_cursor")]
    pub last_file_id: i64,
    /// Entries on this page
    #[serde(rename = "fileList", default)]
    pub file_list: Vec<RemoteEntry>,
}

fn terminal_cursor() -> i64 {
    -1
}

/// Payload of `GET /api/v1/user/info`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoData {
    #[serde(default)]
    pub uid: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    /// Bytes in use
    #[serde(default)]
    pub space_used: Option<u64>,
    /// Permanent quota in bytes
    #[serde(default)]
    pub space_permanent: Option<u64>,
    /// Temporary quota in bytes
    #[serde(default)]
    pub space_temp: Option<u64>,
}

// ============================================================================
// Mutations
// ============================================================================

/// Request body for `POST /upload/v1/file/mkdir`
#[derive(Debug, Serialize)]
pub struct MkdirRequest {
    pub name: String,
    #[serde(rename = "parentID")]
    pub parent_id: i64,
}

/// Payload of the mkdir endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MkdirData {
    #[serde(rename = "dirID")]
    pub dir_id: i64,
}

/// Request body for `POST /api/v1/file/move`
#[derive(Debug, Serialize)]
pub struct MoveRequest {
    #[serde(rename = "fileIDs")]
    pub file_ids: Vec<i64>,
    #[serde(rename = "toParentFileID")]
    pub to_parent_file_id: i64,
}

/// Request body for `PUT /api/v1/file/name`
#[derive(Debug, Serialize)]
pub struct RenameRequest {
    #[serde(rename = "fileId")]
    pub file_id: i64,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Request body for `POST /api/v1/file/trash`
#[derive(Debug, Serialize)]
pub struct TrashRequest {
    #[serde(rename = "fileIDs")]
    pub file_ids: Vec<i64>,
}

// ============================================================================
// Upload session
// ============================================================================

/// Request body for `POST /upload/v2/file/create`
#[derive(Debug, Serialize)]
pub struct UploadCreateRequest {
    #[serde(rename = "parentFileID")]
    pub parent_file_id: i64,
    pub filename: String,
    /// MD5 of the full payload, lowercase hex
    pub etag: String,
    pub size: i64,
    /// 1 = server-side rename on collision, 2 = overwrite in place
    pub duplicate: u8,
}

/// Payload of the chunked-upload create endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct UploadCreateData {
    /// Set when `reuse` is true (instant upload) or on completion
    #[serde(rename = "fileID", default)]
    pub file_id: Option<i64>,
    /// Session handle for slice uploads
    #[serde(rename = "preuploadID", default)]
    pub preupload_id: Option<String>,
    /// Server-side dedup hit; no bytes need to move
    #[serde(default)]
    pub reuse: bool,
    /// Server-decreed slice size; not client-tunable
    #[serde(rename = "sliceSize", default)]
    pub slice_size: i64,
}

/// Request body for `POST /upload/v2/file/upload_complete`
#[derive(Debug, Serialize)]
pub struct UploadCompleteRequest {
    #[serde(rename = "preuploadID")]
    pub preupload_id: String,
}

/// Payload of the completion poll
#[derive(Debug, Clone, Deserialize)]
pub struct UploadCompleteData {
    /// True once the server has assembled the file
    #[serde(default)]
    pub completed: bool,
    #[serde(rename = "fileID", default)]
    pub file_id: i64,
}

/// Payload of `POST /upload/v2/file/single/create`
#[derive(Debug, Clone, Deserialize)]
pub struct SingleCreateData {
    #[serde(rename = "fileID", default)]
    pub file_id: Option<i64>,
    #[serde(default)]
    pub completed: bool,
    /// Present when the server wants the caller to poll completion
    #[serde(rename = "preuploadID", default)]
    pub preupload_id: Option<String>,
}

// ============================================================================
// Download
// ============================================================================

/// Payload of `GET /api/v1/file/download_info`
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadInfoData {
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
}
