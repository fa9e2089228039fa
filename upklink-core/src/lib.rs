//! This crate implements the core functionality of upklink
//!
//! This mostly includes UPK package symbol-table parsing, the hex mod-script
//! document model, and the reference retargeting engine that rewrites a
//! script from one package's symbol space into another's.

pub mod document;
pub mod error;
pub mod format;
pub mod hex;
pub mod resolve;

/// Local developer utilities (kept as a module, not a binary).
pub mod test;

// re-export for convenience
pub use document::ModDocument;
pub use format::package::UpkPackage;
