//! Content-based media type detection.
//!
//! Types are sniffed from the leading bytes of the content using a fixed
//! signature table in the style of the WHATWG MIME sniffing algorithm. The
//! type a client declares is never consulted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Number of leading bytes inspected when sniffing.
pub const SNIFF_LEN: usize = 512;

/// A sniffed media type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MediaType {
    essence: &'static str,
    charset: Option<&'static str>,
}

impl MediaType {
    pub const OCTET_STREAM: Self = Self::new("application/octet-stream");
    pub const TEXT_PLAIN: Self = Self::new("text/plain").with_charset("utf-8");
    pub const TEXT_HTML: Self = Self::new("text/html").with_charset("utf-8");
    pub const TEXT_XML: Self = Self::new("text/xml").with_charset("utf-8");
    pub const PDF: Self = Self::new("application/pdf");
    pub const POSTSCRIPT: Self = Self::new("application/postscript");
    pub const PNG: Self = Self::new("image/png");
    pub const JPEG: Self = Self::new("image/jpeg");
    pub const GIF: Self = Self::new("image/gif");
    pub const BMP: Self = Self::new("image/bmp");
    pub const WEBP: Self = Self::new("image/webp");
    pub const ICO: Self = Self::new("image/x-icon");
    pub const OGG: Self = Self::new("application/ogg");
    pub const MP3: Self = Self::new("audio/mpeg");
    pub const ZIP: Self = Self::new("application/zip");
    pub const GZIP: Self = Self::new("application/x-gzip");
    pub const RAR: Self = Self::new("application/x-rar-compressed");
    pub const WASM: Self = Self::new("application/wasm");

    const fn new(essence: &'static str) -> Self {
        Self {
            essence,
            charset: None,
        }
    }

    const fn with_charset(self, charset: &'static str) -> Self {
        Self {
            essence: self.essence,
            charset: Some(charset),
        }
    }

    /// The `type/subtype` part without parameters.
    pub fn essence(&self) -> &'static str {
        self.essence
    }

    pub fn charset(&self) -> Option<&'static str> {
        self.charset
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.charset {
            Some(charset) => write!(f, "{}; charset={}", self.essence, charset),
            None => f.write_str(self.essence),
        }
    }
}

enum Signature {
    /// Exact prefix match.
    Prefix(&'static [u8], MediaType),
    /// Masked prefix match: `data[i] & mask[i] == pattern[i]`.
    Masked {
        mask: &'static [u8],
        pattern: &'static [u8],
        media: MediaType,
    },
    /// Case-insensitive HTML tag after optional leading whitespace, terminated
    /// by a space or `>`.
    HtmlTag(&'static [u8]),
}

const SIGNATURES: &[Signature] = &[
    Signature::HtmlTag(b"<!DOCTYPE HTML"),
    Signature::HtmlTag(b"<HTML"),
    Signature::HtmlTag(b"<HEAD"),
    Signature::HtmlTag(b"<SCRIPT"),
    Signature::HtmlTag(b"<IFRAME"),
    Signature::HtmlTag(b"<H1"),
    Signature::HtmlTag(b"<DIV"),
    Signature::HtmlTag(b"<FONT"),
    Signature::HtmlTag(b"<TABLE"),
    Signature::HtmlTag(b"<A"),
    Signature::HtmlTag(b"<STYLE"),
    Signature::HtmlTag(b"<TITLE"),
    Signature::HtmlTag(b"<B"),
    Signature::HtmlTag(b"<BODY"),
    Signature::HtmlTag(b"<BR"),
    Signature::HtmlTag(b"<P"),
    Signature::HtmlTag(b"<!--"),
    Signature::Prefix(b"<?xml", MediaType::TEXT_XML),
    Signature::Prefix(b"%PDF-", MediaType::PDF),
    Signature::Prefix(b"%!PS-Adobe-", MediaType::POSTSCRIPT),
    Signature::Prefix(b"\xFE\xFF", MediaType::new("text/plain").with_charset("utf-16be")),
    Signature::Prefix(b"\xFF\xFE", MediaType::new("text/plain").with_charset("utf-16le")),
    Signature::Prefix(b"\xEF\xBB\xBF", MediaType::TEXT_PLAIN),
    Signature::Prefix(b"\x00\x00\x01\x00", MediaType::ICO),
    Signature::Prefix(b"\x00\x00\x02\x00", MediaType::ICO),
    Signature::Prefix(b"BM", MediaType::BMP),
    Signature::Prefix(b"GIF87a", MediaType::GIF),
    Signature::Prefix(b"GIF89a", MediaType::GIF),
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WEBPVP",
        media: MediaType::WEBP,
    },
    Signature::Prefix(b"\x89PNG\r\n\x1A\n", MediaType::PNG),
    Signature::Prefix(b"\xFF\xD8\xFF", MediaType::JPEG),
    Signature::Prefix(b"OggS\x00", MediaType::OGG),
    Signature::Prefix(b"ID3", MediaType::MP3),
    Signature::Prefix(b"\x1F\x8B\x08", MediaType::GZIP),
    Signature::Prefix(b"PK\x03\x04", MediaType::ZIP),
    Signature::Prefix(b"Rar!\x1A\x07\x00", MediaType::RAR),
    Signature::Prefix(b"Rar!\x1A\x07\x01\x00", MediaType::RAR),
    Signature::Prefix(b"\x00asm", MediaType::WASM),
];

impl Signature {
    fn matches(&self, data: &[u8]) -> Option<MediaType> {
        match self {
            Signature::Prefix(prefix, media) => data.starts_with(prefix).then_some(*media),
            Signature::Masked {
                mask,
                pattern,
                media,
            } => {
                if data.len() < pattern.len() {
                    return None;
                }
                let hit = data
                    .iter()
                    .zip(mask.iter().zip(pattern.iter()))
                    .all(|(byte, (m, p))| byte & m == *p);
                hit.then_some(*media)
            }
            Signature::HtmlTag(tag) => {
                let data = skip_whitespace(data);
                if data.len() < tag.len() + 1 {
                    return None;
                }
                let (head, rest) = data.split_at(tag.len());
                if !head.eq_ignore_ascii_case(tag) {
                    return None;
                }
                matches!(rest[0], b' ' | b'>').then_some(MediaType::TEXT_HTML)
            }
        }
    }
}

fn skip_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

/// Bytes that never appear in plain text.
fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

/// Sniff the media type of `data`.
///
/// Only the first [`SNIFF_LEN`] bytes are considered. Unrecognized binary
/// content yields [`MediaType::OCTET_STREAM`].
pub fn sniff(data: &[u8]) -> MediaType {
    let data = &data[..data.len().min(SNIFF_LEN)];

    if let Some(media) = SIGNATURES.iter().find_map(|sig| sig.matches(data)) {
        return media;
    }

    if !data.is_empty() && !data.iter().copied().any(is_binary_byte) {
        return MediaType::TEXT_PLAIN;
    }

    MediaType::OCTET_STREAM
}

/// The set of media type essences accepted for ingestion.
///
/// Configured as a map from essence to enabled. A configured map replaces
/// the defaults entirely; entries set to `false` document a type that is
/// deliberately off:
///
/// ```toml
/// [ingest.allowed_types]
/// "image/jpeg" = true
/// "image/png" = true
/// "image/gif" = true
/// "application/pdf" = false
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(HashMap<String, bool>);

impl AllowList {
    /// Build an allow-list enabling exactly `types`.
    pub fn of<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            types
                .into_iter()
                .map(|t| (t.into().to_ascii_lowercase(), true))
                .collect(),
        )
    }

    /// Whether the media type's essence is enabled.
    pub fn permits(&self, media: &MediaType) -> bool {
        self.0.get(media.essence()).copied().unwrap_or(false)
    }

    /// Enabled essences, sorted.
    pub fn enabled(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .0
            .iter()
            .filter(|(_, on)| **on)
            .map(|(t, _)| t.as_str())
            .collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|on| !on)
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::of(["image/jpeg", "image/png", "application/pdf", "text/plain"])
    }
}
