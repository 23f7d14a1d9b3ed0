//! Content fingerprinting for change detection.
//!
//! A unit's fingerprint is a SHA-256 digest over the UTF-8 bytes of its
//! text. Equal text always produces an equal fingerprint; metadata-only
//! changes never trigger reprocessing.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::progress::LedgerEntry;

/// Compute the fingerprint of a unit's text. Pure, deterministic.
pub fn hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// True when the unit needs (re)processing: absent from the ledger, or
/// recorded with a different fingerprint. Only consulted in incremental
/// and daily modes; full mode treats every unit as updated.
pub fn is_updated(
    unit_id: &str,
    fingerprint: &str,
    ledger: &BTreeMap<String, LedgerEntry>,
) -> bool {
    match ledger.get(unit_id) {
        Some(entry) => entry.content_hash != fingerprint,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitMetadata;

    fn meta(page_id: &str) -> UnitMetadata {
        UnitMetadata {
            page_id: page_id.to_string(),
            page_title: "t".to_string(),
            space_key: "S".to_string(),
            space_name: "Space".to_string(),
            space_depth: 0,
            parent_space: None,
            url: String::new(),
            version: 1,
            content_type: "page".to_string(),
            attachment_id: None,
            attachment_title: None,
        }
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash("hello"), hash("hello"));
        assert_eq!(hash("").len(), 64);
    }

    #[test]
    fn hash_differs_on_single_byte() {
        assert_ne!(hash("hello"), hash("hello "));
        assert_ne!(hash("a"), hash("b"));
    }

    #[test]
    fn unknown_unit_is_updated() {
        let ledger = BTreeMap::new();
        assert!(is_updated("123", &hash("x"), &ledger));
    }

    #[test]
    fn matching_fingerprint_is_not_updated() {
        let mut ledger = BTreeMap::new();
        let fp = hash("body text");
        ledger.insert(
            "123".to_string(),
            LedgerEntry {
                content_hash: fp.clone(),
                last_processed: chrono::Utc::now(),
                metadata: meta("123"),
            },
        );
        assert!(!is_updated("123", &fp, &ledger));
        assert!(is_updated("123", &hash("edited body text"), &ledger));
    }
}
