// src/detect/version.rs

//! Version token extraction from package listings

/// First whitespace-separated field that contains a `.` and is longer
/// than three characters.
///
/// This is a heuristic, not a parser: it is only fed listing lines that
/// do not repeat the package name (see `PackageManager::describe`), where
/// the first dotted field is the version.
pub fn extract_version_token(listing: &str) -> Option<String> {
    listing
        .split_whitespace()
        .find(|token| token.contains('.') && token.len() > 3)
        .map(str::to_string)
}
