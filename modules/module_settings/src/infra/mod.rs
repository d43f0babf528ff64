//! Infrastructure layer - storage backends and encryption

pub mod crypto;
pub mod storage;
