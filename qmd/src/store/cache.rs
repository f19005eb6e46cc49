//! Persistent cache for LLM responses.
//!
//! Keys are content-addressed over the request (endpoint plus canonical
//! JSON body), so identical requests hit without talking to the provider.
//! The table is bounded by an occasional trim to the newest entries.

use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};

use super::Store;
use crate::error::Result;

/// Default cache size ceiling.
pub const CACHE_MAX_ENTRIES: usize = 1000;

/// Build a cache key from an endpoint name and request body.
///
/// serde_json maps serialize with sorted keys, which makes the encoding
/// canonical for equal values.
pub fn generate_cache_key(url: &str, body: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(body.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Store {
    /// Look up a cached response.
    pub fn cache_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT result FROM ollama_cache WHERE hash = ?1",
                [key],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// Store a response, occasionally trimming the table back to the
    /// `max` most recently created entries (1% of writes).
    pub fn cache_set_with_cleanup(&self, key: &str, value: &str, max: usize) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO ollama_cache (hash, result, created_at)
             VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )?;

        if rand::random::<f64>() < 0.01 {
            self.trim_cache(max)?;
        }
        Ok(())
    }

    /// Keep only the `max` newest cache entries.
    pub fn trim_cache(&self, max: usize) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM ollama_cache
             WHERE hash NOT IN (
                 SELECT hash FROM ollama_cache
                 ORDER BY created_at DESC
                 LIMIT ?1
             )",
            [max],
        )?;
        Ok(removed)
    }

    /// Drop every cached response. Returns the number removed.
    pub fn clear_cache(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM ollama_cache", [])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::*;

    #[test]
    fn key_is_deterministic_and_order_insensitive() {
        let a = generate_cache_key(
            "expandQuery",
            &serde_json::json!({"query": "q", "model": "m"}),
        );
        let b = generate_cache_key(
            "expandQuery",
            &serde_json::json!({"model": "m", "query": "q"}),
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = generate_cache_key(
            "expandQuery",
            &serde_json::json!({"model": "m", "query": "other"}),
        );
        assert_ne!(a, c);
    }

    #[test]
    fn get_set_round_trip() {
        let (store, _dir) = test_store();
        assert_eq!(store.cache_get("missing").unwrap(), None);
        store.cache_set_with_cleanup("k1", "value", CACHE_MAX_ENTRIES).unwrap();
        assert_eq!(store.cache_get("k1").unwrap(), Some("value".to_string()));
    }

    #[test]
    fn trim_keeps_newest() {
        let (store, _dir) = test_store();
        for i in 0..10 {
            store
                .conn
                .execute(
                    "INSERT INTO ollama_cache (hash, result, created_at)
                     VALUES (?1, 'v', ?2)",
                    params![format!("k{i}"), format!("2026-01-01T00:00:{i:02}Z")],
                )
                .unwrap();
        }
        let removed = store.trim_cache(3).unwrap();
        assert_eq!(removed, 7);
        // The three newest survive.
        assert!(store.cache_get("k9").unwrap().is_some());
        assert!(store.cache_get("k7").unwrap().is_some());
        assert!(store.cache_get("k0").unwrap().is_none());
    }

    #[test]
    fn clear_reports_count() {
        let (store, _dir) = test_store();
        store.cache_set_with_cleanup("a", "1", CACHE_MAX_ENTRIES).unwrap();
        store.cache_set_with_cleanup("b", "2", CACHE_MAX_ENTRIES).unwrap();
        assert_eq!(store.clear_cache().unwrap(), 2);
        assert_eq!(store.clear_cache().unwrap(), 0);
    }
}
