//! Derivation of the stable, external `item_key` (§3.1).
//!
//! URL-addressable items key off the URL; search-based items (flea
//! markets, Yahoo search) key off `store + keyword` so the same keyword
//! searched on two different stores yields distinct keys.

use sha2::{Digest, Sha256};

const KEY_LEN: usize = 12;

fn truncated_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..KEY_LEN].to_string()
}

pub fn from_url(url: &str) -> String {
    truncated_hex(url)
}

pub fn from_search(store: &str, keyword: &str) -> String {
    truncated_hex(&format!("{store}|{keyword}"))
}

/// Derives the key for a checked item: URL-based when a URL is present,
/// otherwise search-based. `search_cond` deliberately does not
/// participate (§9, "search_cond in key").
pub fn derive(store: &str, url: Option<&str>, search_keyword: Option<&str>) -> anyhow::Result<String> {
    if let Some(url) = url.filter(|u| !u.is_empty()) {
        return Ok(from_url(url));
    }
    if let Some(keyword) = search_keyword.filter(|k| !k.is_empty()) {
        return Ok(from_search(store, keyword));
    }
    anyhow::bail!("item has neither a url nor a search_keyword; cannot derive item_key")
}
