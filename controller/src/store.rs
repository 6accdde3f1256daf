use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use hygrostat_common::{RuntimeConfig, StoredState};

pub type StoredStates = BTreeMap<String, StoredState>;

/// JSON files under the data directory: `runtime.json` for configuration,
/// `state.json` for the per-hygrostat restore snapshots.
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("HYGROSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.hygrostat"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn runtime_path(&self) -> &Path {
        &self.runtime_path
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<Option<RuntimeConfig>> {
        let _guard = self.lock.lock().await;
        read_json(&self.runtime_path).await
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.runtime_path, runtime).await
    }

    pub async fn load_states(&self) -> anyhow::Result<StoredStates> {
        let _guard = self.lock.lock().await;
        Ok(read_json(&self.state_path).await?.unwrap_or_default())
    }

    pub async fn save_state(&self, name: &str, state: StoredState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut states: StoredStates = read_json(&self.state_path).await?.unwrap_or_default();
        states.insert(name.to_string(), state);
        write_json(&self.state_path, &states).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice::<T>(&raw)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn scratch_dir(test: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hygrostat-store-{test}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn missing_files_load_as_empty() {
        let store = AppStore::new(scratch_dir("missing"));

        assert!(store.load_runtime_config().await.unwrap().is_none());
        assert!(store.load_states().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn states_are_kept_per_name() {
        let dir = scratch_dir("states");
        let store = AppStore::new(&dir);
        let bathroom = StoredState {
            mode: "humidify".to_string(),
            target_humidity: Some(serde_json::json!(45.0)),
            preset: Some("none".to_string()),
            saved_at: None,
        };
        let cellar = StoredState {
            mode: "off".to_string(),
            ..bathroom.clone()
        };

        store.save_state("bathroom", bathroom.clone()).await.unwrap();
        store.save_state("cellar", cellar.clone()).await.unwrap();

        let states = store.load_states().await.unwrap();
        assert_eq!(states.get("bathroom"), Some(&bathroom));
        assert_eq!(states.get("cellar"), Some(&cellar));

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn runtime_config_round_trips() {
        let dir = scratch_dir("runtime");
        let store = AppStore::new(&dir);

        store
            .save_runtime_config(&RuntimeConfig::default())
            .await
            .unwrap();
        let loaded = store.load_runtime_config().await.unwrap().unwrap();
        assert_eq!(loaded.hygrostats, RuntimeConfig::default().hygrostats);

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
