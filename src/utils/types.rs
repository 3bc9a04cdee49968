/// Generated once per upload, 32 lowercase hex chars (simple uuid v4)
pub type ReceiptId = String;

/// Uploading user, as taken from the validated `username_token` header
pub type Owner = String;

/// Size label of a configured dimension (`small`, `medium`, ...). Empty means the unscaled copy
pub type SizeLabel = str;
