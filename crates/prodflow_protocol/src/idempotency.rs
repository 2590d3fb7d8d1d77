//! Stable key identifying a production rule.

use blake3::Hasher;

const SEP: u8 = 0x1f;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Stable hash identifying a production rule.
///
/// Components:
/// - output dataset type
/// - output tag (build/dbtag/version triplet)
/// - build as written in the rule
pub fn rule_identity_key(dsttype: &str, tag: &str, build: &str) -> String {
    hash_parts(&[dsttype, tag, build])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_is_deterministic() {
        assert_eq!(
            rule_identity_key("DST_CALO", "ana472_2024p012_v001", "ana.472"),
            rule_identity_key("DST_CALO", "ana472_2024p012_v001", "ana.472")
        );
    }

    #[test]
    fn separator_prevents_concatenation_collisions() {
        assert_ne!(
            rule_identity_key("DST_CAL", "Oana", "x"),
            rule_identity_key("DST_CALO", "ana", "x")
        );
    }
}
