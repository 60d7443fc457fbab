//! Commands that span several components.
//!
//! Catalog and registry commands live next to their component
//! ([`super::catalog`], [`super::site_roles`], [`super::guild_roles`]).

use std::collections::HashSet;

use tracing::info;
use uuid::Uuid;

use super::catalog::require_permissions;
use super::error::{AccessError, AccessResult};
use super::guard::{actor_site_context, require_role_or_permission_edit_rights, AttemptedFields};
use super::helpers::{guild_permission_context, site_permission_context};
use super::models::{UpdateUserAccess, UserAccess};
use super::store::AccessStore;
use super::sync::dedup_ids;

/// Effective site permission slugs of a user.
#[tracing::instrument(skip(store))]
pub async fn resolve_site_permission_slugs<S: AccessStore + ?Sized>(
    store: &S,
    user_id: Uuid,
) -> AccessResult<HashSet<String>> {
    Ok(site_permission_context(store, user_id).await?.permissions)
}

/// Effective permission slugs of a user inside a guild.
#[tracing::instrument(skip(store))]
pub async fn resolve_guild_permission_slugs<S: AccessStore + ?Sized>(
    store: &S,
    user_id: Uuid,
    guild_id: Uuid,
) -> AccessResult<HashSet<String>> {
    Ok(guild_permission_context(store, user_id, guild_id)
        .await?
        .permissions)
}

/// Replace a user's site roles and/or direct permission grants.
///
/// The actor's edit rights are checked before anything else; a request that
/// touches a field the actor may not edit changes nothing. Every referenced
/// role and permission must exist, and both replacements commit together.
#[tracing::instrument(skip(store))]
pub async fn update_user_roles_and_permissions<S: AccessStore + ?Sized>(
    store: &S,
    actor: Option<Uuid>,
    user_id: Uuid,
    request: UpdateUserAccess,
) -> AccessResult<UserAccess> {
    let actor_ctx = actor_site_context(store, actor).await?;
    require_role_or_permission_edit_rights(Some(&actor_ctx), AttemptedFields::of(&request))?;

    let user = store
        .find_user(user_id)
        .await?
        .ok_or(AccessError::NotFound("User"))?;

    let role_ids = request.role_ids.as_deref().map(dedup_ids);
    if let Some(ids) = &role_ids {
        if store.find_site_roles(ids).await?.len() != ids.len() {
            return Err(AccessError::NotFound("Site role"));
        }
    }

    let permission_ids = request.permission_ids.as_deref().map(dedup_ids);
    if let Some(ids) = &permission_ids {
        require_permissions(store, ids).await?;
    }

    store
        .replace_user_access(user_id, role_ids.as_deref(), permission_ids.as_deref())
        .await?;

    let roles = store.user_roles(user_id).await?;
    let permissions = store.user_permissions(user_id).await?;

    info!(
        actor_id = %actor_ctx.user_id,
        %user_id,
        roles = roles.len(),
        permissions = permissions.len(),
        "User roles and permissions updated"
    );

    Ok(UserAccess {
        user,
        roles,
        permissions,
    })
}
