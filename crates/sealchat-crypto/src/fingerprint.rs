//! Identity fingerprints for out-of-band comparison.

use sha2::{Digest, Sha256};

/// SHA-256 over the SPKI DER encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(spki: &[u8]) -> Self {
        Self(Sha256::digest(spki).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Compare against a fingerprint read back by a human. Whitespace and
    /// case are ignored; the byte comparison is constant time.
    pub fn matches(&self, spoken: &str) -> bool {
        let cleaned: String = spoken.chars().filter(|c| !c.is_whitespace()).collect();
        match hex::decode(cleaned.to_ascii_lowercase()) {
            Ok(bytes) => constant_time_eq::constant_time_eq(&bytes, &self.0),
            Err(_) => false,
        }
    }
}

/// Groups of four hex digits: `3f2a 91c0 ...`
impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = hex::encode(self.0);
        for (i, chunk) in hex.as_bytes().chunks(4).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            // hex output is ASCII
            f.write_str(std::str::from_utf8(chunk).map_err(|_| std::fmt::Error)?)?;
        }
        Ok(())
    }
}
