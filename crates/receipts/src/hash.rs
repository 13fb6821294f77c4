use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Content fingerprint of a receipt document, as lowercase hex. Two trips
/// whose receipts share a fingerprint were billed with the same document.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_fingerprint() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn fingerprints_separate_documents() {
        assert_eq!(sha256_hex(b"%PDF-1.5 a"), sha256_hex(b"%PDF-1.5 a"));
        assert_ne!(sha256_hex(b"%PDF-1.5 a"), sha256_hex(b"%PDF-1.5 b"));
        assert_eq!(sha256_hex(b"x").len(), 64);
    }
}
