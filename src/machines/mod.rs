//! Machine registry (component 4.C): upsert, presence flags, stale-sweep,
//! ownership checks. A thin business-rule layer over `db::queries`.

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::db::queries;
use crate::error::{AppError, AppResult};
use crate::models::{Capabilities, Machine, MachineInfo, Platform};

#[derive(Clone)]
pub struct MachineRegistry {
    pool: PgPool,
}

impl MachineRegistry {
    pub fn new(pool: PgPool) -> Self {
        MachineRegistry { pool }
    }

    pub async fn register(
        &self,
        user_id: Uuid,
        name: &str,
        platform: Platform,
        capabilities: Capabilities,
    ) -> AppResult<Machine> {
        queries::upsert_machine(&self.pool, user_id, name, platform, capabilities).await
    }

    pub async fn set_online(&self, id: Uuid, online: bool) -> AppResult<()> {
        queries::set_online(&self.pool, id, online).await
    }

    pub async fn heartbeat(&self, id: Uuid) -> AppResult<()> {
        queries::touch_last_seen(&self.pool, id).await
    }

    pub async fn list_owned(&self, user_id: Uuid) -> AppResult<Vec<MachineInfo>> {
        let machines = queries::list_machines_by_user(&self.pool, user_id).await?;
        Ok(machines.into_iter().map(MachineInfo::from_owned).collect())
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Option<Machine>> {
        queries::get_machine(&self.pool, id).await
    }

    /// Transitions online machines whose `last_seen` predates `timeout`;
    /// returns the ids that flipped offline.
    pub async fn sweep_stale(&self, timeout: Duration) -> AppResult<Vec<Uuid>> {
        let timeout = ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::seconds(90));
        queries::sweep_stale(&self.pool, timeout).await
    }

    /// Currently implemented as ownership; the future rule is "ownership OR
    /// shared via team". Callers MUST go through this boolean so sharing can
    /// be added later without touching call sites.
    pub async fn can_access(&self, user_id: Uuid, machine_id: Uuid) -> AppResult<bool> {
        match self.get(machine_id).await? {
            Some(machine) => Ok(machine.user_id == user_id),
            None => Ok(false),
        }
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> AppResult<bool> {
        queries::delete_machine(&self.pool, user_id, id).await
    }

    pub async fn rename(&self, user_id: Uuid, id: Uuid, new_name: &str) -> AppResult<bool> {
        if new_name.trim().is_empty() {
            return Err(AppError::Validation("Machine name must not be empty".into()));
        }
        queries::rename_machine(&self.pool, user_id, id, new_name).await
    }
}
