// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Id helpers for branches, correlation ids, and generated names.

/// Generate a fresh uuid string (hyphenated v4).
pub fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Short prefix of an id, used in log output.
///
/// For uuids this is the first hyphen-separated group; other ids are
/// truncated to at most eight characters.
pub fn short(id: &str) -> &str {
    match id.find('-') {
        Some(i) => &id[..i],
        None => {
            let end = id.char_indices().nth(8).map(|(i, _)| i).unwrap_or(id.len());
            &id[..end]
        }
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
