//! Filesystem-safe names for intermediate and output files.
//!
//! Names are derived from a SHA-256 digest of the describing fields rather
//! than from titles directly, so they are stable across runs and never carry
//! characters from untrusted metadata beyond the sanitized service prefix.

use sha2::{Digest, Sha256};

/// Characters that are invalid in Windows filenames
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Number of hex digits of the digest kept in a file stem.
const STEM_HASH_LEN: usize = 12;

/// Replace control and path-hostile characters with underscores.
///
/// Consecutive replacements collapse into one; an empty result becomes "unnamed".
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || c.is_whitespace() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Hex SHA-256 of the given parts, separated by NUL so ("ab","c") != ("a","bc").
pub fn digest_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// File stem for a task's files: `<service>_<hash>`.
pub fn task_file_stem(service: &str, title: &str, author: &str, task_id: &str) -> String {
    let digest = digest_hex(&[service, title, author, task_id]);
    format!(
        "{}_{}",
        sanitize_filename(service),
        &digest[..STEM_HASH_LEN]
    )
}
