/// Extension used when a MIME type is not in the table.
pub const UNKNOWN_EXTENSION: &str = "bin";

/// File extension for an image MIME type. Parameters (`; charset=...`) and
/// case are ignored.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match normalize_mime(mime).as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/tiff" => "tif",
        "image/svg+xml" => "svg",
        _ => UNKNOWN_EXTENSION,
    }
}

/// Lowercased MIME essence without parameters.
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_lowercase()
}
