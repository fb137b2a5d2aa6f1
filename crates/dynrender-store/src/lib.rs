use std::collections::BTreeMap;

use serde_json::Value;

pub use sea_orm;

pub mod db;
pub mod entities;
pub mod memory;

pub use db::DbStore;
pub use memory::MemoryStore;

/// A read-modify-write step applied while the store holds its exclusive section.
///
/// Returning an error aborts the write; the stored value stays untouched.
pub type Edit<'a> = Box<dyn FnOnce(&mut Value) -> anyhow::Result<()> + Send + 'a>;

/// Key/value settings persistence shared by every render task in the process.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;

    async fn all(&self) -> anyhow::Result<BTreeMap<String, Value>>;

    /// Applies `edit` to the value under `key` (`Null` when missing) and stores the result.
    ///
    /// Concurrent `modify` calls on the same key serialize; none can observe the
    /// other's intermediate state.
    async fn modify(&self, key: &str, edit: Edit<'_>) -> anyhow::Result<Value>;

    /// Stores `value` only when `key` has never been set. Returns whether it wrote.
    async fn set_if_absent(&self, key: &str, value: Value) -> anyhow::Result<bool> {
        let mut wrote = false;
        let flag = &mut wrote;
        self.modify(
            key,
            Box::new(move |current| {
                if current.is_null() {
                    *current = value;
                    *flag = true;
                }
                Ok(())
            }),
        )
        .await?;
        Ok(wrote)
    }
}
