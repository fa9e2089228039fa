//! On-disk file formats consumed by upklink.

pub mod package;
