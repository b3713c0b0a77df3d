//! # Cache Key Generation Module
//!
//! ## Purpose
//! Derives stable, collision-resistant cache filenames from source identifiers.
//! The same identifier always maps to the same filename across runs and
//! processes, so the on-disk directory alone is sufficient to answer lookups.
//!
//! ## Input/Output Specification
//! - **Input**: Source identifier (typically an image URL)
//! - **Output**: `{sha256-hex}.{ext}` filename with a normalized extension
//! - **Extensions**: Restricted to a known image allow-list, defaulting to `.jpg`
//!
//! ## Key Features
//! - SHA-256 over the full identifier for practical collision freedom
//! - Extension inferred from the URL path with query/fragment stripped
//! - No error conditions; a degenerate identifier still yields a valid key

use sha2::{Digest, Sha256};

/// Image extensions recognized when inferring the cached filename
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Fallback extension when the identifier carries none we recognize
const DEFAULT_EXTENSION: &str = "jpg";

/// Compute the cache filename for an identifier
pub fn cache_key(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    let digest = hasher.finalize();

    let hash: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
    format!("{}.{}", hash, file_extension(identifier))
}

/// Infer a normalized image extension from an identifier
pub fn file_extension(identifier: &str) -> &'static str {
    // Query strings and fragments are not part of the filename
    let path = identifier.split(['?', '#']).next().unwrap_or(identifier);
    let name = path.rsplit('/').next().unwrap_or(path);

    match name.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS
                .iter()
                .find(|&&allowed| allowed == ext)
                .copied()
                .unwrap_or(DEFAULT_EXTENSION)
        }
        None => DEFAULT_EXTENSION,
    }
}
