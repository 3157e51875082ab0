/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Secret comparison. SHA-512-crypt (`$6$...`) is the configured
//! default per §6; plain and SHA-256 are kept for back-ends that were
//! provisioned before the default changed.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Sha512Crypt,
    Sha256,
    Plain,
}

pub fn verify(kind: HashKind, secret: &str, stored: &str) -> bool {
    match kind {
        HashKind::Sha512Crypt => pwhash::unix::verify(secret, stored),
        HashKind::Sha256 => {
            use sha2::{Digest, Sha256};
            let digest = Sha256::digest(secret.as_bytes());
            hex(&digest) == stored.trim_start_matches("{sha256}")
        }
        HashKind::Plain => secret == stored,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_matches() {
        assert!(verify(HashKind::Plain, "hunter2", "hunter2"));
        assert!(!verify(HashKind::Plain, "hunter2", "other"));
    }

    #[test]
    fn sha256_matches() {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(b"hunter2");
        let stored = hex(&digest);
        assert!(verify(HashKind::Sha256, "hunter2", &stored));
    }
}
