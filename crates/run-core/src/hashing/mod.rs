//! Checksums sha256 de archivos descargados.

mod checksum;

pub use checksum::{file_sha256, verify_checksum};
