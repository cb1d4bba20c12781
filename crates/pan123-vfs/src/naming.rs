//! Unique-name generation for collision handling
//!
//! When a rename or move would land on an occupied name, the engine picks
//! `name (1).ext`, `name (2).ext`, … up to 999, truncating the stem so
//! the result stays inside the 255-byte limit, with the current UNIX
//! timestamp as the last resort. `.partial` transfer artifacts keep their
//! final `.partial` suffix so the host still recognizes them.

use std::collections::HashSet;

use chrono::Utc;
use tracing::warn;

use pan123_core::domain::name::MAX_NAME_BYTES;
use pan123_core::domain::newtypes::FileId;
use pan123_core::Result;

use crate::resolver::Resolver;

/// Highest numeric suffix tried before falling back to a timestamp
pub const MAX_SUFFIX_ATTEMPTS: u32 = 999;

/// Splits a name into (stem, extension-with-dot), treating a trailing
/// `.partial` as part of the extension
fn split_name(name: &str) -> (&str, String) {
    let (body, partial) = match name.strip_suffix(".partial") {
        Some(body) if !body.is_empty() => (body, ".partial"),
        _ => (name, ""),
    };
    match body.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}{partial}")),
        _ => (body, partial.to_string()),
    }
}

/// Builds a candidate with the given suffix text, truncating the stem to
/// respect the byte limit
fn candidate_with_suffix(name: &str, suffix: &str) -> String {
    let (stem, ext) = split_name(name);
    let budget = MAX_NAME_BYTES.saturating_sub(suffix.len() + ext.len());
    let mut stem_out = String::new();
    for c in stem.chars() {
        if stem_out.len() + c.len_utf8() > budget {
            break;
        }
        stem_out.push(c);
    }
    format!("{stem_out}{suffix}{ext}")
}

/// The `name (n).ext` candidate
#[must_use]
pub fn numbered_candidate(name: &str, n: u32) -> String {
    candidate_with_suffix(name, &format!(" ({n})"))
}

/// The timestamped last-resort candidate
#[must_use]
pub fn timestamp_candidate(name: &str, unix_ts: i64) -> String {
    candidate_with_suffix(name, &format!(" ({unix_ts})"))
}

/// Picks a name under `parent` that no current sibling uses.
///
/// Takes one listing pass to learn the sibling set, then probes
/// candidates in memory, so a deep collision run costs one listing
/// rather than hundreds.
pub async fn generate_unique_name(
    resolver: &Resolver,
    parent: FileId,
    desired: &str,
) -> Result<String> {
    let siblings: HashSet<String> = resolver
        .list_all(parent)
        .await?
        .into_iter()
        .map(|e| e.filename)
        .collect();

    if !siblings.contains(desired) {
        return Ok(desired.to_string());
    }
    for n in 1..=MAX_SUFFIX_ATTEMPTS {
        let candidate = numbered_candidate(desired, n);
        if !siblings.contains(&candidate) {
            return Ok(candidate);
        }
    }
    let fallback = timestamp_candidate(desired, Utc::now().timestamp());
    warn!(desired, %parent, "numeric suffixes exhausted, using timestamp");
    Ok(fallback)
}
