use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::{Edit, SettingsStore};

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SettingsStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn all(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        Ok(self.values.lock().await.clone())
    }

    async fn modify(&self, key: &str, edit: Edit<'_>) -> anyhow::Result<Value> {
        let mut values = self.values.lock().await;
        let mut value = values.get(key).cloned().unwrap_or(Value::Null);
        edit(&mut value)?;
        values.insert(key.to_string(), value.clone());
        Ok(value)
    }
}
