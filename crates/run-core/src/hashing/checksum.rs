//! Helpers de hashing: lectura por bloques para no cargar el archivo entero en memoria.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::CoreError;

/// Sha256 (hex en minúsculas) del contenido del archivo.
pub fn file_sha256(path: &Path) -> Result<String, CoreError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compara el sha256 del archivo con `expected` (ignora mayúsculas).
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), CoreError> {
    let actual = file_sha256(path)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(CoreError::ChecksumMismatch { expected: expected.to_string(), actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("abc.txt");
        std::fs::write(&p, b"abc").unwrap();
        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(file_sha256(&p).unwrap(), expected);
        assert!(verify_checksum(&p, &expected.to_uppercase()).is_ok());
        assert!(matches!(verify_checksum(&p, "00"), Err(CoreError::ChecksumMismatch { .. })));
    }
}
