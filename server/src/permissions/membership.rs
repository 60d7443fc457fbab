//! Membership index: which guild a character belongs to, and with which role.
//!
//! A character holds at most one membership row at a time. Forming and
//! dissolving memberships is driven by the host application; this module
//! only keeps the index consistent.

use tracing::info;
use uuid::Uuid;

use super::error::{AccessError, AccessResult};
use super::models::GuildMember;
use super::store::AccessStore;

/// Check that `role_id` names a role of `guild_id`.
async fn require_role_in_guild<S: AccessStore + ?Sized>(
    store: &S,
    guild_id: Uuid,
    role_id: Uuid,
) -> AccessResult<()> {
    let role = store
        .find_guild_role(role_id)
        .await?
        .ok_or(AccessError::NotFound("Guild role"))?;
    if role.guild_id != guild_id {
        return Err(AccessError::Validation(
            "Guild role belongs to another guild".to_string(),
        ));
    }
    Ok(())
}

#[tracing::instrument(skip(store))]
pub async fn add_member<S: AccessStore + ?Sized>(
    store: &S,
    guild_id: Uuid,
    character_id: Uuid,
    role_id: Option<Uuid>,
) -> AccessResult<GuildMember> {
    if store.find_guild(guild_id).await?.is_none() {
        return Err(AccessError::NotFound("Guild"));
    }
    if store.find_character(character_id).await?.is_none() {
        return Err(AccessError::NotFound("Character"));
    }
    if let Some(role_id) = role_id {
        require_role_in_guild(store, guild_id, role_id).await?;
    }
    if store.membership_of(character_id).await?.is_some() {
        return Err(AccessError::Validation(
            "Character already belongs to a guild".to_string(),
        ));
    }

    let member = store.insert_member(guild_id, character_id, role_id).await?;

    info!(%guild_id, %character_id, member_id = %member.id, "Guild member added");
    Ok(member)
}

/// Move a member to another role of the same guild, or clear the role.
#[tracing::instrument(skip(store))]
pub async fn set_member_role<S: AccessStore + ?Sized>(
    store: &S,
    member_id: Uuid,
    role_id: Option<Uuid>,
) -> AccessResult<GuildMember> {
    let member = store
        .find_member(member_id)
        .await?
        .ok_or(AccessError::NotFound("Guild member"))?;
    if let Some(role_id) = role_id {
        require_role_in_guild(store, member.guild_id, role_id).await?;
    }

    let member = store
        .set_member_role(member_id, role_id)
        .await?
        .ok_or(AccessError::NotFound("Guild member"))?;

    info!(%member_id, role_id = ?member.guild_role_id, "Guild member role changed");
    Ok(member)
}

#[tracing::instrument(skip(store))]
pub async fn remove_member<S: AccessStore + ?Sized>(store: &S, member_id: Uuid) -> AccessResult<()> {
    if !store.delete_member(member_id).await? {
        return Err(AccessError::NotFound("Guild member"));
    }
    info!(%member_id, "Guild member removed");
    Ok(())
}

/// The character's membership row, if it has one.
pub async fn membership_of<S: AccessStore + ?Sized>(
    store: &S,
    character_id: Uuid,
) -> AccessResult<Option<GuildMember>> {
    if store.find_character(character_id).await?.is_none() {
        return Err(AccessError::NotFound("Character"));
    }
    store.membership_of(character_id).await
}

/// Members of a guild in join order.
pub async fn list_members<S: AccessStore + ?Sized>(
    store: &S,
    guild_id: Uuid,
) -> AccessResult<Vec<GuildMember>> {
    if store.find_guild(guild_id).await?.is_none() {
        return Err(AccessError::NotFound("Guild"));
    }
    store.list_members(guild_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::memory::MemoryAccessStore;
    use crate::permissions::models::{Character, Guild, GuildRole};
    use crate::permissions::store::GuildRoleDraft;

    async fn guild_with_role(store: &MemoryAccessStore, name: &str) -> (Guild, GuildRole) {
        let owner = store.insert_user(&format!("{name}-owner")).await;
        let guild = store.insert_guild(name, owner.id, None).await.unwrap();
        let role = store
            .insert_guild_role(GuildRoleDraft {
                guild_id: guild.id,
                name: "Member".into(),
                slug: "member".into(),
                priority: None,
            })
            .await
            .unwrap();
        (guild, role)
    }

    async fn character(store: &MemoryAccessStore, name: &str) -> Character {
        let user = store.insert_user(name).await;
        store.insert_character(user.id, name).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_member_with_role() {
        let store = MemoryAccessStore::new();
        let (guild, role) = guild_with_role(&store, "Night Watch").await;
        let aria = character(&store, "aria").await;

        let member = add_member(&store, guild.id, aria.id, Some(role.id))
            .await
            .unwrap();

        assert_eq!(member.guild_role_id, Some(role.id));
        assert_eq!(
            membership_of(&store, aria.id).await.unwrap(),
            Some(member.clone())
        );
        assert_eq!(list_members(&store, guild.id).await.unwrap(), vec![member]);
    }

    #[tokio::test]
    async fn test_character_belongs_to_one_guild() {
        let store = MemoryAccessStore::new();
        let (first, _) = guild_with_role(&store, "Night Watch").await;
        let (second, _) = guild_with_role(&store, "Dawn").await;
        let aria = character(&store, "aria").await;

        add_member(&store, first.id, aria.id, None).await.unwrap();
        let result = add_member(&store, second.id, aria.id, None).await;

        assert!(matches!(result, Err(AccessError::Validation(_))));
        assert!(list_members(&store, second.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_role_must_belong_to_members_guild() {
        let store = MemoryAccessStore::new();
        let (guild, _) = guild_with_role(&store, "Night Watch").await;
        let (_, foreign_role) = guild_with_role(&store, "Dawn").await;
        let aria = character(&store, "aria").await;

        let result = add_member(&store, guild.id, aria.id, Some(foreign_role.id)).await;
        assert!(matches!(result, Err(AccessError::Validation(_))));

        let member = add_member(&store, guild.id, aria.id, None).await.unwrap();
        let result = set_member_role(&store, member.id, Some(foreign_role.id)).await;
        assert!(matches!(result, Err(AccessError::Validation(_))));
    }

    #[tokio::test]
    async fn test_member_moves_between_roles() {
        let store = MemoryAccessStore::new();
        let (guild, member_role) = guild_with_role(&store, "Night Watch").await;
        let officer = store
            .insert_guild_role(GuildRoleDraft {
                guild_id: guild.id,
                name: "Officer".into(),
                slug: "officer".into(),
                priority: Some(50),
            })
            .await
            .unwrap();
        let aria = character(&store, "aria").await;
        let member = add_member(&store, guild.id, aria.id, Some(member_role.id))
            .await
            .unwrap();

        let member = set_member_role(&store, member.id, Some(officer.id))
            .await
            .unwrap();
        assert_eq!(member.guild_role_id, Some(officer.id));

        let member = set_member_role(&store, member.id, None).await.unwrap();
        assert_eq!(member.guild_role_id, None);
    }

    #[tokio::test]
    async fn test_remove_member_frees_character() {
        let store = MemoryAccessStore::new();
        let (first, _) = guild_with_role(&store, "Night Watch").await;
        let (second, _) = guild_with_role(&store, "Dawn").await;
        let aria = character(&store, "aria").await;
        let member = add_member(&store, first.id, aria.id, None).await.unwrap();

        remove_member(&store, member.id).await.unwrap();
        assert_eq!(membership_of(&store, aria.id).await.unwrap(), None);

        add_member(&store, second.id, aria.id, None).await.unwrap();
        assert!(matches!(
            remove_member(&store, member.id).await,
            Err(AccessError::NotFound("Guild member"))
        ));
    }

    #[tokio::test]
    async fn test_unknown_references() {
        let store = MemoryAccessStore::new();
        let (guild, _) = guild_with_role(&store, "Night Watch").await;
        let aria = character(&store, "aria").await;

        assert!(matches!(
            add_member(&store, Uuid::now_v7(), aria.id, None).await,
            Err(AccessError::NotFound("Guild"))
        ));
        assert!(matches!(
            add_member(&store, guild.id, Uuid::now_v7(), None).await,
            Err(AccessError::NotFound("Character"))
        ));
        assert!(matches!(
            add_member(&store, guild.id, aria.id, Some(Uuid::now_v7())).await,
            Err(AccessError::NotFound("Guild role"))
        ));
        assert!(matches!(
            membership_of(&store, Uuid::now_v7()).await,
            Err(AccessError::NotFound("Character"))
        ));
    }
}
