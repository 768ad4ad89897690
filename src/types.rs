/// Result of a successful asset upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Public URL the asset is served from.
    pub url: String,
    /// `ETag` reported by the origin, if any.
    pub etag: Option<String>,
}
