//! Repository traits for metadata operations.

pub mod content;
pub mod tokens;

pub use content::ContentRepo;
pub use tokens::TokenRepo;
