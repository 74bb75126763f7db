//! Session-owned farmer profile and analysis history.
//!
//! Each mutation is written to the snapshot backend before it is committed
//! in memory, so a failed write leaves the session unchanged.

use std::iter;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::errors::AppError;
use crate::models::{AnalysisRecord, FarmerProfile};
use crate::snapshot::SnapshotStore;

pub const PROFILE_KEY: &str = "farmer-details";
pub const HISTORY_KEY: &str = "analysis-history";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub profile: Option<FarmerProfile>,
    /// Newest first.
    pub history: Vec<AnalysisRecord>,
}

pub struct SessionStore {
    backend: Arc<dyn SnapshotStore>,
    state: SessionState,
}

impl SessionStore {
    /// Rehydrates from `backend`. Corrupt slots are logged and start empty.
    pub async fn load(backend: Arc<dyn SnapshotStore>) -> Self {
        let profile = match read_slot::<Option<FarmerProfile>>(backend.as_ref(), PROFILE_KEY).await {
            Ok(Some(Some(profile))) => match profile.validate() {
                Ok(()) => Some(profile),
                Err(e) => {
                    warn!(key = PROFILE_KEY, error = %e, "Stored profile failed validation, discarding");
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                warn!(key = PROFILE_KEY, error = %e, "Failed to restore snapshot, starting empty");
                None
            }
        };

        let history = match read_slot::<Vec<AnalysisRecord>>(backend.as_ref(), HISTORY_KEY).await {
            Ok(history) => history.unwrap_or_default(),
            Err(e) => {
                warn!(key = HISTORY_KEY, error = %e, "Failed to restore snapshot, starting empty");
                Vec::new()
            }
        };

        info!(
            registered = profile.is_some(),
            history = history.len(),
            "Session state restored"
        );

        Self {
            backend,
            state: SessionState { profile, history },
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn profile(&self) -> Option<&FarmerProfile> {
        self.state.profile.as_ref()
    }

    pub fn history(&self) -> &[AnalysisRecord] {
        &self.state.history
    }

    /// Registers the farmer. Only the first call succeeds.
    pub async fn set_profile(&mut self, profile: FarmerProfile) -> Result<(), AppError> {
        profile.validate()?;
        if self.state.profile.is_some() {
            return Err(AppError::Conflict("Farmer is already registered".to_string()));
        }

        let profile = Some(profile);
        write_slot(self.backend.as_ref(), PROFILE_KEY, &profile).await?;
        self.state.profile = profile;
        Ok(())
    }

    /// Prepends `record`, keeping history newest first.
    pub async fn append_to_history(&mut self, record: AnalysisRecord) -> Result<(), AppError> {
        let next: Vec<&AnalysisRecord> = iter::once(&record).chain(&self.state.history).collect();
        write_slot(self.backend.as_ref(), HISTORY_KEY, &next).await?;
        drop(next);

        self.state.history.insert(0, record);
        Ok(())
    }

    /// Writes both slots.
    pub async fn save(&self) -> Result<(), AppError> {
        write_slot(self.backend.as_ref(), PROFILE_KEY, &self.state.profile).await?;
        write_slot(self.backend.as_ref(), HISTORY_KEY, &self.state.history).await
    }
}

async fn read_slot<T: DeserializeOwned>(backend: &dyn SnapshotStore, key: &str) -> Result<Option<T>, AppError> {
    let raw = match backend.read(key).await? {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let envelope: Envelope<T> =
        serde_json::from_str(&raw).map_err(|e| AppError::PersistenceCorrupt(format!("{}: {}", key, e)))?;
    if envelope.version != SNAPSHOT_VERSION {
        return Err(AppError::PersistenceCorrupt(format!(
            "{}: unsupported snapshot version {}",
            key, envelope.version
        )));
    }
    Ok(Some(envelope.data))
}

async fn write_slot<T: Serialize>(backend: &dyn SnapshotStore, key: &str, data: &T) -> Result<(), AppError> {
    let envelope = Envelope {
        version: SNAPSHOT_VERSION,
        data,
    };
    let raw = serde_json::to_string(&envelope).map_err(|e| AppError::Storage(e.to_string()))?;
    backend.write(key, &raw).await
}
