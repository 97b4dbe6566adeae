use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::SessionId;
use storage::Storage;

use crate::state_store::{parse_sound_flag, ClientStateStore, SESSION_ID_KEY, SOUND_EFFECTS_KEY};

pub struct DurableStateStore {
    store: Storage,
}

impl DurableStateStore {
    pub async fn initialize(database_url: &str) -> Result<Arc<Self>> {
        let store = Storage::new(database_url)
            .await
            .with_context(|| format!("failed to initialize client state at '{database_url}'"))?;
        Ok(Arc::new(Self { store }))
    }

    pub fn sqlite_url_for_data_dir(base_dir: &Path) -> String {
        format!(
            "sqlite://{}",
            base_dir
                .join("shipfeed.db")
                .to_string_lossy()
                .replace('\\', "/")
        )
    }
}

#[async_trait]
impl ClientStateStore for DurableStateStore {
    async fn load_session_id(&self) -> Result<Option<SessionId>> {
        Ok(self
            .store
            .get_setting(SESSION_ID_KEY)
            .await?
            .filter(|id| !id.is_empty())
            .map(SessionId::from))
    }

    async fn save_session_id(&self, session_id: &SessionId) -> Result<()> {
        self.store
            .put_setting(SESSION_ID_KEY, session_id.as_str())
            .await
    }

    async fn clear_session_id(&self) -> Result<()> {
        self.store.delete_setting(SESSION_ID_KEY).await?;
        Ok(())
    }

    async fn sound_effects_enabled(&self) -> Result<bool> {
        let raw = self.store.get_setting(SOUND_EFFECTS_KEY).await?;
        Ok(parse_sound_flag(raw.as_deref()))
    }

    async fn set_sound_effects_enabled(&self, enabled: bool) -> Result<()> {
        self.store
            .put_setting(SOUND_EFFECTS_KEY, if enabled { "true" } else { "false" })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_and_sound_flag_round_trip_through_sqlite() {
        let store = DurableStateStore::initialize("sqlite::memory:")
            .await
            .expect("store");

        assert_eq!(store.load_session_id().await.expect("load"), None);
        assert!(store.sound_effects_enabled().await.expect("sound default"));

        store
            .save_session_id(&SessionId::from("sess-42"))
            .await
            .expect("save");
        store
            .set_sound_effects_enabled(false)
            .await
            .expect("mute");

        assert_eq!(
            store.load_session_id().await.expect("load"),
            Some(SessionId::from("sess-42"))
        );
        assert!(!store.sound_effects_enabled().await.expect("sound"));

        store.clear_session_id().await.expect("clear");
        assert_eq!(store.load_session_id().await.expect("load"), None);
    }

    #[test]
    fn data_dir_url_points_at_sqlite_file() {
        let url = DurableStateStore::sqlite_url_for_data_dir(Path::new("/tmp/shipfeed"));
        assert_eq!(url, "sqlite:///tmp/shipfeed/shipfeed.db");
    }
}
