use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorType {
    Forbidden,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorType {
    InvalidBody,
    InvalidImage,
    QueueFull,
    StorageError,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadErrorType {
    InvalidReceiptId,
    InvalidSize,
    NotFound,
    StorageError,
}

#[derive(Debug, Serialize)]
#[serde(bound = "T: Serialize")]
pub struct ErrorResponse<T> {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<T>,
}
