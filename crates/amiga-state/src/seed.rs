//! First-start administrator.
//!
//! A fresh database has nobody who can delete accounts or fix payment keys.
//! `ensure_admin_seed` creates one administrator at the top stage, once. Later
//! starts see the marker in `meta` (or an existing admin) and do nothing.

use amiga_core::error::AmigaError;
use amiga_core::participant::NewParticipant;
use amiga_core::types::{ParticipantId, Role, Timestamp};
use tracing::info;

use crate::engine::CycleEngine;

const SEED_MARKER: &str = "admin_seeded";

/// Create the administrator account unless one already exists.
///
/// Returns the new id, or `None` when nothing was created.
pub fn ensure_admin_seed(
    engine: &CycleEngine,
    username: &str,
    password: &str,
    now: Timestamp,
) -> Result<Option<ParticipantId>, AmigaError> {
    if engine.db.get_meta(SEED_MARKER)?.is_some() {
        return Ok(None);
    }
    if let Some(existing) = engine.list_participants()?.into_iter().find(|p| p.is_admin()) {
        info!(participant = %existing.id, "administrator already present");
        engine.db.put_meta(SEED_MARKER, &existing.id.to_key())?;
        return Ok(None);
    }

    let id = engine.register(
        &NewParticipant {
            username: username.to_string(),
            full_name: "Administrador".to_string(),
            password: password.to_string(),
            ..Default::default()
        },
        Role::Admin,
        engine.params().max_stage,
        now,
    )?;
    engine.db.put_meta(SEED_MARKER, &id.to_key())?;
    info!(participant = %id, username, "administrator seeded");
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use amiga_core::cycle::CycleParams;

    use crate::db::StateDb;

    #[test]
    fn seeds_once() {
        let engine = CycleEngine::new(Arc::new(StateDb::temporary().unwrap()), CycleParams::default())
            .unwrap();
        let id = ensure_admin_seed(&engine, "admin", "admin123", 0).unwrap().unwrap();
        assert!(ensure_admin_seed(&engine, "admin", "admin123", 0).unwrap().is_none());

        let admin = engine.participant(id).unwrap();
        assert!(admin.is_admin());
        assert_eq!(admin.stage, 3);
        assert_eq!(admin.plan, "Diamante");
        assert_eq!(engine.authenticate("admin", "admin123").unwrap().role, Role::Admin);
        assert_eq!(engine.list_participants().unwrap().len(), 1);
    }

    #[test]
    fn existing_admin_is_respected() {
        let engine = CycleEngine::new(Arc::new(StateDb::temporary().unwrap()), CycleParams::default())
            .unwrap();
        let boss = engine
            .register(
                &NewParticipant {
                    username: "boss".into(),
                    full_name: "Boss".into(),
                    password: "pw".into(),
                    ..Default::default()
                },
                Role::Admin,
                3,
                0,
            )
            .unwrap();

        assert!(ensure_admin_seed(&engine, "admin", "admin123", 0).unwrap().is_none());
        assert!(engine.participant_by_username("admin").is_err());
        assert_eq!(engine.db.get_meta(SEED_MARKER).unwrap(), Some(boss.to_key().to_vec()));
    }
}
