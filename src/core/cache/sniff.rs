//! Image type detection for downloaded payloads.
//!
//! Resolution order, first match wins:
//! 1. magic bytes of the payload
//! 2. declared `Content-Type` (only `image/*`; any other declared type rejects)
//! 3. extension of the final URL path, restricted to [`IMAGE_EXTENSIONS`]

use ureq::http::Uri;

use super::fetch::Download;

/// Extensions treated as images, lowercase with leading dot
pub const IMAGE_EXTENSIONS: &[&str] = &[".png", ".gif", ".jpg", ".jpeg", ".webp", ".svg"];

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

pub fn is_supported_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// Detect image type from leading bytes.
pub fn from_magic(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&PNG_SIGNATURE) {
        return Some(".png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(".jpg");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(".webp");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(".gif");
    }
    None
}

/// Media type of a header value, lowercased, parameters stripped
/// (`"Image/PNG; charset=x"` -> `"image/png"`).
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Map an `image/*` media type to its extension.
pub fn from_content_type(content_type: &str) -> Option<&'static str> {
    match media_type(content_type).as_str() {
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/webp" => Some(".webp"),
        "image/gif" => Some(".gif"),
        "image/svg+xml" => Some(".svg"),
        _ => None,
    }
}

/// Whitelisted image extension of a URL's path, lowercase.
///
/// Query and fragment never count. Strings that don't parse as absolute URLs
/// fall back to a raw suffix check on the text before any `?` or `#`.
pub fn url_extension(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    let path = match url.parse::<Uri>() {
        Ok(uri) if uri.scheme().is_some() => uri.path().to_string(),
        _ => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let file_name = path.rsplit('/').next().unwrap_or_default();
    let dot = file_name.rfind('.')?;
    let ext = file_name[dot..].to_ascii_lowercase();
    is_supported_extension(&ext).then_some(ext)
}

/// Pick the extension for a downloaded payload, or None if it isn't an image.
pub fn resolve_extension(requested_url: &str, download: &Download) -> Option<String> {
    if let Some(ext) = from_magic(&download.bytes) {
        return Some(ext.to_string());
    }

    if let Some(content_type) = download.content_type.as_deref().filter(|ct| !ct.trim().is_empty()) {
        if !media_type(content_type).starts_with("image/") {
            return None;
        }
        if let Some(ext) = from_content_type(content_type) {
            return Some(ext.to_string());
        }
    }

    url_extension(download.final_url.as_deref().unwrap_or(requested_url))
}
