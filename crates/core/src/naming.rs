//! Storage name derivation from untrusted display names.

use crate::content::ContentId;
use std::fmt;

/// Maximum length, in bytes, of the sanitized part of a storage name.
pub const MAX_NAME_LEN: usize = 200;

/// Reduce an untrusted display name to a safe single path component.
///
/// Only the final component survives (both `/` and `\` separate components).
/// Control characters are dropped, each whitespace run becomes one `_`, and
/// the result is truncated to [`MAX_NAME_LEN`] bytes on a char boundary.
/// Names that reduce to nothing, `.` or `..` are rejected.
pub fn sanitize_name(declared: &str) -> crate::Result<String> {
    let base = declared
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut out = String::with_capacity(base.len());
    let mut in_space = false;
    for c in base.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if !c.is_control() {
            out.push(c);
        }
    }

    if out.len() > MAX_NAME_LEN {
        let mut cut = MAX_NAME_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }

    match out.as_str() {
        "" | "_" => Err(crate::Error::InvalidName(format!(
            "{declared:?} has no usable file name"
        ))),
        "." | ".." => Err(crate::Error::InvalidName(format!(
            "{declared:?} is a relative path component"
        ))),
        _ => Ok(out),
    }
}

/// The on-disk name of a content object: `<uuid>-<sanitized name>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageName(String);

impl StorageName {
    /// Derive the storage name for `id` from an untrusted display name.
    pub fn derive(id: ContentId, declared: &str) -> crate::Result<Self> {
        let name = sanitize_name(declared)?;
        Ok(Self(format!("{id}-{name}")))
    }

    /// The storage key under the content prefix.
    pub fn key(&self) -> String {
        format!("{}{}", crate::CONTENT_PREFIX, self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
