//! Core domain types and shared logic for the satchel content locker.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content identifiers and records
//! - Principals (ownership keys)
//! - Media type sniffing and allow-lists
//! - Storage name derivation
//! - Token scopes and authorization

pub mod config;
pub mod content;
pub mod error;
pub mod media;
pub mod naming;
pub mod principal;
pub mod token;

pub use content::{ContentId, ContentRecord};
pub use error::{Error, Result};
pub use media::{MediaType, SNIFF_LEN};
pub use naming::{StorageName, sanitize_name};
pub use principal::Principal;
pub use token::{Token, TokenId, TokenScope};

/// Storage key prefix under which all content objects live.
pub const CONTENT_PREFIX: &str = "content/";
