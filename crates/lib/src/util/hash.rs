//! Hashing helpers.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// First `len` characters of a hex digest, for log lines.
pub fn short_digest(digest: &str, len: usize) -> &str {
  &digest[..digest.len().min(len)]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sha256_of_known_input() {
    assert_eq!(
      sha256_hex(b"hello"),
      "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
  }

  #[test]
  fn short_digest_clamps() {
    assert_eq!(short_digest("abcdef", 4), "abcd");
    assert_eq!(short_digest("ab", 4), "ab");
  }
}
