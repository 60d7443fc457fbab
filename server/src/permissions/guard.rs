//! Access guard: the only place authorization failures are raised.
//!
//! The checks come in two layers. The pure `require_*` functions take an
//! already resolved context (`None` meaning no authenticated user); the
//! async `authorize_*` functions load that context first.

use tracing::warn;
use uuid::Uuid;

use super::error::{AccessError, AccessResult};
use super::helpers::{
    guild_permission_context, site_permission_context, GuildPermissionContext,
    SitePermissionContext,
};
use super::models::UpdateUserAccess;
use super::store::AccessStore;
use super::well_known::SitePermission;

/// Which parts of a user's access a combined update tries to change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptedFields {
    pub roles: bool,
    pub permissions: bool,
}

impl AttemptedFields {
    #[must_use]
    pub const fn of(request: &UpdateUserAccess) -> Self {
        Self {
            roles: request.role_ids.is_some(),
            permissions: request.permission_ids.is_some(),
        }
    }

    /// Site permissions needed to apply every attempted field.
    #[must_use]
    pub fn required(self) -> Vec<SitePermission> {
        let mut required = Vec::with_capacity(2);
        if self.roles {
            required.push(SitePermission::ChangeUserRoles);
        }
        if self.permissions {
            required.push(SitePermission::ChangeUserPermissions);
        }
        required
    }
}

pub fn require_site_permission(
    ctx: Option<&SitePermissionContext>,
    slug: &str,
) -> AccessResult<()> {
    let ctx = ctx.ok_or(AccessError::Unauthenticated)?;
    if ctx.has(slug) {
        return Ok(());
    }
    warn!(user_id = %ctx.user_id, "Site permission check denied");
    Err(AccessError::Forbidden)
}

/// Forbidden unless one of the user's characters is a member of the guild.
pub fn require_guild_membership(ctx: Option<&GuildPermissionContext>) -> AccessResult<()> {
    let ctx = ctx.ok_or(AccessError::Unauthenticated)?;
    if ctx.is_member {
        return Ok(());
    }
    warn!(user_id = %ctx.user_id, guild_id = %ctx.guild_id, "Guild membership check denied");
    Err(AccessError::Forbidden)
}

/// Forbidden unless the user holds at least one of `allowed` in the guild.
pub fn require_any_guild_permission(
    ctx: Option<&GuildPermissionContext>,
    allowed: &[&str],
) -> AccessResult<()> {
    let ctx = ctx.ok_or(AccessError::Unauthenticated)?;
    if ctx.has_any(allowed) {
        return Ok(());
    }
    warn!(user_id = %ctx.user_id, guild_id = %ctx.guild_id, "Guild permission check denied");
    Err(AccessError::Forbidden)
}

/// Edit rights for a combined roles-and-permissions update.
///
/// Changing role assignments needs `change-user-roles`, changing direct
/// grants needs `change-user-permissions`. If any attempted field lacks its
/// grant the whole request is rejected.
pub fn require_role_or_permission_edit_rights(
    ctx: Option<&SitePermissionContext>,
    attempted: AttemptedFields,
) -> AccessResult<()> {
    let ctx = ctx.ok_or(AccessError::Unauthenticated)?;
    if attempted.required().iter().all(|p| ctx.has(p.slug())) {
        return Ok(());
    }
    warn!(
        user_id = %ctx.user_id,
        roles = attempted.roles,
        permissions = attempted.permissions,
        "User access edit denied"
    );
    Err(AccessError::Forbidden)
}

/// Site context of the acting user. Unknown ids count as unauthenticated.
pub async fn actor_site_context<S: AccessStore + ?Sized>(
    store: &S,
    actor: Option<Uuid>,
) -> AccessResult<SitePermissionContext> {
    let actor = actor.ok_or(AccessError::Unauthenticated)?;
    match site_permission_context(store, actor).await {
        Err(AccessError::NotFound("User")) => Err(AccessError::Unauthenticated),
        other => other,
    }
}

async fn actor_guild_context<S: AccessStore + ?Sized>(
    store: &S,
    actor: Option<Uuid>,
    guild_id: Uuid,
) -> AccessResult<GuildPermissionContext> {
    let actor = actor.ok_or(AccessError::Unauthenticated)?;
    match guild_permission_context(store, actor, guild_id).await {
        Err(AccessError::NotFound("User")) => Err(AccessError::Unauthenticated),
        other => other,
    }
}

/// Load the actor's site permissions and require `slug`.
#[tracing::instrument(skip(store))]
pub async fn authorize_site_permission<S: AccessStore + ?Sized>(
    store: &S,
    actor: Option<Uuid>,
    slug: &str,
) -> AccessResult<SitePermissionContext> {
    let ctx = actor_site_context(store, actor).await?;
    require_site_permission(Some(&ctx), slug)?;
    Ok(ctx)
}

#[tracing::instrument(skip(store))]
pub async fn authorize_guild_membership<S: AccessStore + ?Sized>(
    store: &S,
    actor: Option<Uuid>,
    guild_id: Uuid,
) -> AccessResult<GuildPermissionContext> {
    let ctx = actor_guild_context(store, actor, guild_id).await?;
    require_guild_membership(Some(&ctx))?;
    Ok(ctx)
}

#[tracing::instrument(skip(store))]
pub async fn authorize_any_guild_permission<S: AccessStore + ?Sized>(
    store: &S,
    actor: Option<Uuid>,
    guild_id: Uuid,
    allowed: &[&str],
) -> AccessResult<GuildPermissionContext> {
    let ctx = actor_guild_context(store, actor, guild_id).await?;
    require_any_guild_permission(Some(&ctx), allowed)?;
    Ok(ctx)
}
