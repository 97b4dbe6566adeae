use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::SessionId;
use tokio::sync::Mutex;

pub const SESSION_ID_KEY: &str = "shipanion_session_id";
pub const SOUND_EFFECTS_KEY: &str = "soundEffectsEnabled";

/// The only durable client-side state: a resumable session and the sound toggle.
#[async_trait]
pub trait ClientStateStore: Send + Sync {
    async fn load_session_id(&self) -> Result<Option<SessionId>>;
    async fn save_session_id(&self, session_id: &SessionId) -> Result<()>;
    async fn clear_session_id(&self) -> Result<()>;
    async fn sound_effects_enabled(&self) -> Result<bool>;
    async fn set_sound_effects_enabled(&self, enabled: bool) -> Result<()>;
}

/// Anything other than an explicit "false" reads as enabled.
pub(crate) fn parse_sound_flag(raw: Option<&str>) -> bool {
    raw != Some("false")
}

#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(SESSION_ID_KEY.to_string(), session_id.into());
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl ClientStateStore for MemoryStateStore {
    async fn load_session_id(&self) -> Result<Option<SessionId>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(SESSION_ID_KEY)
            .map(|id| SessionId::from(id.as_str())))
    }

    async fn save_session_id(&self, session_id: &SessionId) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(SESSION_ID_KEY.to_string(), session_id.0.clone());
        Ok(())
    }

    async fn clear_session_id(&self) -> Result<()> {
        self.entries.lock().await.remove(SESSION_ID_KEY);
        Ok(())
    }

    async fn sound_effects_enabled(&self) -> Result<bool> {
        let entries = self.entries.lock().await;
        Ok(parse_sound_flag(
            entries.get(SOUND_EFFECTS_KEY).map(String::as_str),
        ))
    }

    async fn set_sound_effects_enabled(&self, enabled: bool) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(SOUND_EFFECTS_KEY.to_string(), enabled.to_string());
        Ok(())
    }
}
