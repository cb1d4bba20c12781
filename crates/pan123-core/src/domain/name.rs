//! Filename validation and cleaning
//!
//! The remote rejects names that are empty, longer than 255 bytes or 256
//! code points, or that contain one of a small forbidden character set.
//! [`validate_name`] enforces those rules locally so invalid names never
//! cross the API boundary; [`clean_name`] rewrites an arbitrary candidate
//! into an acceptable one, preserving the extension where possible.
//!
//! Cleaning is idempotent: `clean_name(clean_name(n)) == clean_name(n)`,
//! and `validate_name(&clean_name(n))` always succeeds.

use super::errors::BackendError;
use crate::Result;

/// Characters the remote refuses inside names
pub const FORBIDDEN_CHARS: &[char] = &['"', '\\', '/', ':', '*', '?', '|', '>', '<'];

/// Maximum name length in bytes
pub const MAX_NAME_BYTES: usize = 255;

/// Maximum name length in Unicode code points
pub const MAX_NAME_CHARS: usize = 256;

/// Checks a name against the remote's rules
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BackendError::Validation("name is empty".to_string()));
    }
    if name.trim().is_empty() {
        return Err(BackendError::Validation(
            "name is whitespace-only".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(BackendError::Validation(format!(
            "name {name:?} is a reserved path segment"
        )));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(BackendError::Validation(format!(
            "name exceeds {MAX_NAME_BYTES} bytes: {} bytes",
            name.len()
        )));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(BackendError::Validation(format!(
            "name exceeds {MAX_NAME_CHARS} characters"
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(BackendError::Validation(format!(
            "name contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

/// Rewrites a name so that [`validate_name`] accepts it.
///
/// Forbidden characters become `_`; empty and whitespace-only names become
/// a single `_`; overlong names are truncated on a character boundary with
/// the extension preserved when one exists.
#[must_use]
pub fn clean_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if replaced.trim().is_empty() || replaced == "." || replaced == ".." {
        return "_".to_string();
    }

    if replaced.len() <= MAX_NAME_BYTES && replaced.chars().count() <= MAX_NAME_CHARS {
        return replaced;
    }

    truncate_preserving_extension(&replaced)
}

/// Truncates an overlong name to the byte and character limits, keeping
/// the extension when it is short enough to be worth keeping.
fn truncate_preserving_extension(name: &str) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        // Only preserve reasonable extensions; a "stem.<200 bytes>" name
        // is better served by plain truncation.
        Some((stem, ext)) if !stem.is_empty() && ext.len() < 64 => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };

    let byte_budget = MAX_NAME_BYTES.saturating_sub(ext.len());
    let char_budget = MAX_NAME_CHARS.saturating_sub(ext.chars().count());

    let mut out = String::new();
    for c in stem.chars() {
        if out.len() + c.len_utf8() > byte_budget || out.chars().count() + 1 > char_budget {
            break;
        }
        out.push(c);
    }

    if out.trim().is_empty() {
        out = "_".to_string();
    }
    out.push_str(&ext);
    out
}
