use crate::models::Identity;
use crate::state::ServiceContext;

pub fn get_identity(ctx: &ServiceContext) -> Result<Identity, String> {
    let display_name = ctx.db.get_display_name().map_err(|e| e.to_string())?;
    Ok(Identity {
        participant_id: ctx.participant_id.clone(),
        display_name,
    })
}

/// Rename the local participant. Takes effect in the current roster immediately.
pub fn set_display_name(ctx: &ServiceContext, name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Display name must not be empty".into());
    }
    ctx.db.set_display_name(name).map_err(|e| e.to_string())?;
    ctx.roster.set_local_display_name(name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::media::virtual_backend::VirtualBackend;
    use crate::models::Participant;
    use std::sync::Arc;

    #[test]
    fn rename_updates_store_and_roster() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.save_participant_id("me").unwrap();
        let (event_tx, _) = crate::events::create_event_bus();
        let ctx = ServiceContext::new(db, "me".into(), Arc::new(VirtualBackend::new()), event_tx);
        ctx.roster.reset("voice-1", Participant::new("me", "Anonymous"));

        assert!(set_display_name(&ctx, "   ").is_err());
        set_display_name(&ctx, " Alice ").unwrap();

        let identity = get_identity(&ctx).unwrap();
        assert_eq!(identity.participant_id, "me");
        assert_eq!(identity.display_name, "Alice");
        assert_eq!(ctx.roster.local().unwrap().display_name, "Alice");
    }
}
