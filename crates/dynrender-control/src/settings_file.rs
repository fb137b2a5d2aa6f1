use std::path::Path;

use anyhow::Context;
use dynrender_engine::RenderSettings;
use dynrender_store::SettingsStore;

/// Seeds render settings from a TOML file. Keys already present in the store win.
///
/// Returns the keys that were written.
pub async fn seed_from_file(store: &dyn SettingsStore, path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read settings file {}", path.display()))?;
    seed_from_str(store, &raw)
        .await
        .with_context(|| format!("apply settings file {}", path.display()))
}

pub async fn seed_from_str(store: &dyn SettingsStore, raw: &str) -> anyhow::Result<Vec<String>> {
    let table: toml::Table = toml::from_str(raw).context("parse settings TOML")?;

    let mut values = Vec::with_capacity(table.len());
    for (key, value) in table {
        let value = serde_json::to_value(value).context("convert TOML value")?;
        RenderSettings::validate_value(&key, &value)
            .map_err(|e| anyhow::anyhow!("setting `{key}`: {e}"))?;
        values.push((key, value));
    }

    let mut written = Vec::new();
    for (key, value) in values {
        if store.set_if_absent(&key, value).await? {
            written.push(key);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use dynrender_store::MemoryStore;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn seeds_only_missing_keys() {
        let store = MemoryStore::new();
        store.set("render_world", json!("survival")).await.unwrap();

        let written = seed_from_str(
            &store,
            r#"
render_world = "new"
render_queue_size = 3
pterodactyl_api_host = "https://panel.example.com"

[console_patterns]
render_finished = "Finished radius render of '{world}'."
"#,
        )
        .await
        .unwrap();

        assert_eq!(
            written,
            vec![
                "console_patterns".to_string(),
                "pterodactyl_api_host".to_string(),
                "render_queue_size".to_string(),
            ]
        );
        assert_eq!(store.get("render_world").await.unwrap(), Some(json!("survival")));
        assert_eq!(store.get("render_queue_size").await.unwrap(), Some(json!(3)));

        let settings = RenderSettings::load(&store).await.unwrap();
        assert_eq!(
            settings.console_patterns.finished("new"),
            "Finished radius render of 'new'."
        );
    }

    #[tokio::test]
    async fn rejects_unknown_or_mistyped_keys_without_writing() {
        let store = MemoryStore::new();
        assert!(seed_from_str(&store, "render_worlds = \"new\"").await.is_err());
        assert!(
            seed_from_str(&store, "render_world = \"new\"\nrender_queue_size = \"five\"")
                .await
                .is_err()
        );
        assert!(store.all().await.unwrap().is_empty());
    }
}
