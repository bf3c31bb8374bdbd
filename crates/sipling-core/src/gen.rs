// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Collision-resistant identifier generators.
//!
//! Call-IDs, branches, and tags are random nonces, never counters: the
//! thread-local CSPRNG is seeded by the OS per thread, so two processes (or a
//! restart) cannot replay each other's branches.

use rand::Rng;
use smol_str::SmolStr;

/// RFC 3261 §8.1.1.7 branch prefix marking RFC-3261-style transaction IDs.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Generates a Call-ID: 32 hex characters.
pub fn generate_call_id() -> SmolStr {
    SmolStr::new(random_hex(32))
}

/// Generates a Via branch carrying the RFC 3261 magic cookie.
pub fn generate_branch() -> SmolStr {
    let mut branch = String::with_capacity(BRANCH_MAGIC_COOKIE.len() + 16);
    branch.push_str(BRANCH_MAGIC_COOKIE);
    branch.push_str(&random_hex(16));
    SmolStr::new(branch)
}

/// Generates a From/To tag.
pub fn generate_tag() -> SmolStr {
    SmolStr::new(random_hex(16))
}

/// Generates an initial CSeq in the small positive range softphones use.
pub fn generate_cseq() -> u32 {
    rand::thread_rng().gen_range(1..0x8000)
}

fn random_hex(chars: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..chars)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_carries_magic_cookie() {
        let branch = generate_branch();
        assert!(branch.starts_with(BRANCH_MAGIC_COOKIE));
        assert_eq!(branch.len(), BRANCH_MAGIC_COOKIE.len() + 16);
    }

    #[test]
    fn generators_do_not_repeat() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_branch()));
            assert!(seen.insert(generate_call_id()));
            assert!(seen.insert(generate_tag()));
        }
    }

    #[test]
    fn cseq_is_positive_and_small() {
        for _ in 0..100 {
            let cseq = generate_cseq();
            assert!(cseq >= 1);
            assert!(cseq < 0x8000);
        }
    }
}
