use anyhow::{bail, Result};
use rusqlite::{params, OptionalExtension};

use crate::store::{now_ms, Store};
use noesis_core::config::find_key_spec;

impl Store {
    /// Read a Config KV value, overlaid on built-in defaults (§3, §6.4). Invalid
    /// persisted values fall back to the nearest bound (numeric rules) or the
    /// default (non-numeric rules) rather than being surfaced as-is.
    pub fn config_get(&self, key: &str) -> Result<String> {
        let spec = find_key_spec(key);
        let persisted: Option<String> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row("SELECT value FROM config_kv WHERE key = ?1", params![key], |r| r.get(0))
                .optional()?
        };

        match (persisted, spec) {
            (Some(value), Some(spec)) => {
                if spec.rule.validate(&value) {
                    Ok(value)
                } else {
                    Ok(spec.rule.clamp_or_default(&value, spec.default))
                }
            }
            (Some(value), None) => Ok(value),
            (None, Some(spec)) => Ok(spec.default.to_string()),
            (None, None) => bail!("unknown config key: {key}"),
        }
    }

    /// Validate on write; only a value satisfying the key's rule is persisted. Two
    /// keys (`max_iterations`, `tool_timeout_ms`) are protected from deletion but not
    /// from being overwritten.
    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(spec) = find_key_spec(key) {
            if !spec.rule.validate(value) {
                bail!("value '{value}' does not satisfy the validation rule for '{key}'");
            }
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO config_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ms()],
        )?;
        Ok(())
    }

    /// Delete an overlay value, reverting reads to the built-in default. Fails for
    /// the two undeletable keys (§6.4).
    pub fn config_delete(&self, key: &str) -> Result<()> {
        if let Some(spec) = find_key_spec(key) {
            if spec.undeletable {
                bail!("config key '{key}' cannot be deleted");
            }
        }
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM config_kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

pub fn validate(key: &str, value: &str) -> bool {
    match find_key_spec(key) {
        Some(spec) => spec.rule.validate(value),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_falls_back_to_default() {
        let store = Store::open_memory().unwrap();
        assert_eq!(store.config_get("max_iterations").unwrap(), "100");
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let store = Store::open_memory().unwrap();
        store.config_set("temperature", "0.1").unwrap();
        assert_eq!(store.config_get("temperature").unwrap(), "0.1");
    }

    #[test]
    fn test_set_rejects_invalid_value() {
        let store = Store::open_memory().unwrap();
        assert!(store.config_set("temperature", "2.5").is_err());
        assert!(store.config_set("max_iterations", "0").is_err());
    }

    #[test]
    fn test_delete_rejected_for_undeletable_keys() {
        let store = Store::open_memory().unwrap();
        assert!(store.config_delete("max_iterations").is_err());
        assert!(store.config_delete("tool_timeout_ms").is_err());
    }

    #[test]
    fn test_delete_allowed_for_deletable_key_reverts_to_default() {
        let store = Store::open_memory().unwrap();
        store.config_set("temperature", "0.1").unwrap();
        store.config_delete("temperature").unwrap();
        assert_eq!(store.config_get("temperature").unwrap(), "0.7");
    }
}
