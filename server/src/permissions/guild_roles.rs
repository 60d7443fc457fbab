//! Per-guild roles.
//!
//! Each guild has its own role namespace. Guild roles only ever hold
//! Guild-scope permissions, and the `leader` and `novice` roles can never
//! be deleted.

use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::catalog::{checked_patch_slug, checked_slug};
use super::error::{AccessError, AccessResult, BusinessRule};
use super::models::{GuildRole, NewGuildRole, Permission, Scope, UpdateGuildRole};
use super::store::{AccessStore, GuildRoleDraft, GuildRolePatch};
use super::sync::dedup_ids;
use super::well_known::{LEADER_ROLE_SLUG, NOVICE_ROLE_SLUG};

/// Roles every guild starts with: `(slug, name, priority)`.
const DEFAULT_ROLES: [(&str, &str, i32); 2] = [
    (LEADER_ROLE_SLUG, "Leader", 100),
    (NOVICE_ROLE_SLUG, "Novice", 0),
];

/// Ids of the Guild-scope permissions among `permissions`.
pub fn filter_guild_scope(permissions: &[Permission]) -> Vec<Uuid> {
    permissions
        .iter()
        .filter(|p| p.scope == Scope::Guild)
        .map(|p| p.id)
        .collect()
}

async fn require_guild<S: AccessStore + ?Sized>(store: &S, guild_id: Uuid) -> AccessResult<()> {
    match store.find_guild(guild_id).await? {
        Some(_) => Ok(()),
        None => Err(AccessError::NotFound("Guild")),
    }
}

pub async fn get_role<S: AccessStore + ?Sized>(
    store: &S,
    role_id: Uuid,
) -> AccessResult<GuildRole> {
    store
        .find_guild_role(role_id)
        .await?
        .ok_or(AccessError::NotFound("Guild role"))
}

/// Create a role. Without a priority the role ranks above every existing
/// role of the guild.
#[tracing::instrument(skip(store))]
pub async fn create_role<S: AccessStore + ?Sized>(
    store: &S,
    input: NewGuildRole,
) -> AccessResult<GuildRole> {
    input.validate()?;
    let slug = checked_slug(input.slug.as_deref(), &input.name)?;
    require_guild(store, input.guild_id).await?;

    let role = store
        .insert_guild_role(GuildRoleDraft {
            guild_id: input.guild_id,
            name: input.name,
            slug,
            priority: input.priority,
        })
        .await?;

    info!(
        guild_id = %role.guild_id,
        role_id = %role.id,
        slug = %role.slug,
        priority = role.priority,
        "Guild role created"
    );
    Ok(role)
}

/// Replace the role's permission set.
///
/// Site-scope and unknown ids are dropped, not rejected.
#[tracing::instrument(skip(store))]
pub async fn update_permissions<S: AccessStore + ?Sized>(
    store: &S,
    role_id: Uuid,
    permission_ids: &[Uuid],
) -> AccessResult<()> {
    get_role(store, role_id).await?;

    let requested = dedup_ids(permission_ids);
    let known = store.find_permissions(&requested).await?;
    let kept = filter_guild_scope(&known);

    if kept.len() < requested.len() {
        debug!(
            %role_id,
            dropped = requested.len() - kept.len(),
            "Dropped non-guild permission ids from guild role sync"
        );
    }

    let plan = store.replace_guild_role_permissions(role_id, &kept).await?;

    info!(
        %role_id,
        attached = plan.attach.len(),
        detached = plan.detach.len(),
        "Guild role permissions synced"
    );
    Ok(())
}

/// Patch name, slug or priority. Permissions are left alone.
#[tracing::instrument(skip(store))]
pub async fn update_fields<S: AccessStore + ?Sized>(
    store: &S,
    role_id: Uuid,
    input: UpdateGuildRole,
) -> AccessResult<GuildRole> {
    input.validate()?;
    let current = get_role(store, role_id).await?;
    let slug = checked_patch_slug(input.slug.as_deref())?;

    // A protected role cannot shed its slug, or it would become deletable.
    if current.is_protected() && slug.as_deref().is_some_and(|s| s != current.slug) {
        return Err(AccessError::BusinessRule(BusinessRule::Protected));
    }

    let role = store
        .update_guild_role(
            role_id,
            GuildRolePatch {
                name: input.name,
                slug,
                priority: input.priority,
            },
        )
        .await?
        .ok_or(AccessError::NotFound("Guild role"))?;

    info!(guild_id = %role.guild_id, role_id = %role.id, "Guild role updated");
    Ok(role)
}

/// Delete a role. Members holding it are left without a role.
#[tracing::instrument(skip(store))]
pub async fn delete_role<S: AccessStore + ?Sized>(store: &S, role_id: Uuid) -> AccessResult<()> {
    let role = get_role(store, role_id).await?;
    if role.is_protected() {
        return Err(AccessError::BusinessRule(BusinessRule::Protected));
    }

    if !store.delete_guild_role(role_id).await? {
        return Err(AccessError::NotFound("Guild role"));
    }

    info!(guild_id = %role.guild_id, %role_id, "Guild role deleted");
    Ok(())
}

/// Roles of a guild, highest priority first, then by name.
pub async fn list_for_guild<S: AccessStore + ?Sized>(
    store: &S,
    guild_id: Uuid,
) -> AccessResult<Vec<GuildRole>> {
    require_guild(store, guild_id).await?;
    store.list_guild_roles(guild_id).await
}

pub async fn role_permissions<S: AccessStore + ?Sized>(
    store: &S,
    role_id: Uuid,
) -> AccessResult<Vec<Permission>> {
    get_role(store, role_id).await?;
    store.guild_role_permissions(role_id).await
}

/// Create the protected `leader` and `novice` roles if they are missing.
#[tracing::instrument(skip(store))]
pub async fn seed_default_roles<S: AccessStore + ?Sized>(
    store: &S,
    guild_id: Uuid,
) -> AccessResult<Vec<GuildRole>> {
    require_guild(store, guild_id).await?;

    for (slug, name, priority) in DEFAULT_ROLES {
        if store.find_guild_role_by_slug(guild_id, slug).await?.is_some() {
            continue;
        }
        let role = store
            .insert_guild_role(GuildRoleDraft {
                guild_id,
                name: name.to_string(),
                slug: slug.to_string(),
                priority: Some(priority),
            })
            .await?;
        info!(%guild_id, role_id = %role.id, slug, "Default guild role created");
    }

    store.list_guild_roles(guild_id).await
}
