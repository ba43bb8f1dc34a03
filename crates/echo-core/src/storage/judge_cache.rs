use crate::storage::store::now_rfc3339;
use crate::storage::Store;
use rusqlite::{params, OptionalExtension};

#[derive(Clone)]
pub struct JudgeCache {
    store: Store,
}

impl JudgeCache {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let conn = self.store.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM judge_cache WHERE key=?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    pub fn put(
        &self,
        key: &str,
        provider: &str,
        model: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let conn = self.store.lock()?;
        conn.execute(
            "INSERT INTO judge_cache(key, provider, model, created_at, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                payload_json=excluded.payload_json,
                created_at=excluded.created_at",
            params![
                key,
                provider,
                model,
                now_rfc3339(),
                serde_json::to_string(payload)?
            ],
        )?;
        Ok(())
    }
}
