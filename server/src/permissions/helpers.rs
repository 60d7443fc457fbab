//! Permission contexts for callers.
//!
//! Loads a user's grants from one store snapshot, runs the resolver and
//! keeps the result around so several checks need no further queries.

use std::collections::HashSet;

use uuid::Uuid;

use super::error::{AccessError, AccessResult};
use super::resolver::{
    guild_resolution, is_guild_member, resolve_guild_permissions, resolve_site_permissions,
    GuildGrants, GuildResolution, SiteGrants,
};
use super::store::AccessStore;

/// Resolved site permissions of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePermissionContext {
    pub user_id: Uuid,
    pub permissions: HashSet<String>,
}

impl SitePermissionContext {
    #[must_use]
    pub fn from_grants(grants: &SiteGrants) -> Self {
        Self {
            user_id: grants.user_id,
            permissions: resolve_site_permissions(grants),
        }
    }

    /// Check if the user holds `slug`.
    #[must_use]
    pub fn has(&self, slug: &str) -> bool {
        self.permissions.contains(slug)
    }

    /// Check if the user holds at least one of `slugs`.
    #[must_use]
    pub fn has_any(&self, slugs: &[&str]) -> bool {
        slugs.iter().any(|slug| self.has(slug))
    }
}

/// Resolved permissions of one user inside one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildPermissionContext {
    pub user_id: Uuid,
    pub guild_id: Uuid,

    /// Which resolution path produced `permissions`.
    pub resolution: GuildResolution,

    /// Whether one of the user's characters has a membership row here.
    /// The leader override does not imply membership.
    pub is_member: bool,

    pub permissions: HashSet<String>,
}

impl GuildPermissionContext {
    #[must_use]
    pub fn from_grants(user_id: Uuid, grants: &GuildGrants) -> Self {
        Self {
            user_id,
            guild_id: grants.guild_id,
            resolution: guild_resolution(user_id, grants),
            is_member: is_guild_member(user_id, grants),
            permissions: resolve_guild_permissions(user_id, grants),
        }
    }

    #[must_use]
    pub fn has(&self, slug: &str) -> bool {
        self.permissions.contains(slug)
    }

    #[must_use]
    pub fn has_any(&self, slugs: &[&str]) -> bool {
        slugs.iter().any(|slug| self.has(slug))
    }

    /// Whether the user controls the guild's leader character.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.resolution == GuildResolution::OwnerOverride
    }
}

/// Load and resolve a user's site permissions.
#[tracing::instrument(skip(store))]
pub async fn site_permission_context<S: AccessStore + ?Sized>(
    store: &S,
    user_id: Uuid,
) -> AccessResult<SitePermissionContext> {
    if store.find_user(user_id).await?.is_none() {
        return Err(AccessError::NotFound("User"));
    }
    let grants = store.load_site_grants(user_id).await?;
    Ok(SitePermissionContext::from_grants(&grants))
}

/// Load and resolve a user's permissions in a guild.
#[tracing::instrument(skip(store))]
pub async fn guild_permission_context<S: AccessStore + ?Sized>(
    store: &S,
    user_id: Uuid,
    guild_id: Uuid,
) -> AccessResult<GuildPermissionContext> {
    if store.find_user(user_id).await?.is_none() {
        return Err(AccessError::NotFound("User"));
    }
    let grants = store
        .load_guild_grants(user_id, guild_id)
        .await?
        .ok_or(AccessError::NotFound("Guild"))?;
    Ok(GuildPermissionContext::from_grants(user_id, &grants))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::resolver::{GuildRoleGrant, MembershipGrant, SiteRoleGrant};

    #[test]
    fn test_site_context_checks() {
        let grants = SiteGrants {
            user_id: Uuid::now_v7(),
            roles: vec![SiteRoleGrant {
                role_id: Uuid::now_v7(),
                slug: "moderator".into(),
                permission_slugs: vec!["hide-post".into()],
            }],
            direct_slugs: vec!["ban-user".into()],
        };
        let ctx = SitePermissionContext::from_grants(&grants);

        assert_eq!(ctx.user_id, grants.user_id);
        assert!(ctx.has("hide-post"));
        assert!(ctx.has("ban-user"));
        assert!(!ctx.has("edit-post"));
        assert!(ctx.has_any(&["edit-post", "ban-user"]));
        assert!(!ctx.has_any(&[]));
    }

    #[test]
    fn test_leader_context_is_not_membership() {
        let leader = Uuid::now_v7();
        let grants = GuildGrants {
            guild_id: Uuid::now_v7(),
            leader_user_id: Some(leader),
            guild_catalog: vec!["view-roster".into()],
            memberships: vec![],
        };
        let ctx = GuildPermissionContext::from_grants(leader, &grants);

        assert!(ctx.is_leader());
        assert!(!ctx.is_member);
        assert!(ctx.has("view-roster"));
    }

    #[test]
    fn test_member_context() {
        let user = Uuid::now_v7();
        let grants = GuildGrants {
            guild_id: Uuid::now_v7(),
            leader_user_id: None,
            guild_catalog: vec![],
            memberships: vec![MembershipGrant {
                member_id: Uuid::now_v7(),
                character_id: Uuid::now_v7(),
                owner_user_id: user,
                role: Some(GuildRoleGrant {
                    role_id: Uuid::now_v7(),
                    slug: "member".into(),
                    permission_slugs: vec!["view-roster".into()],
                }),
            }],
        };
        let ctx = GuildPermissionContext::from_grants(user, &grants);

        assert_eq!(ctx.resolution, GuildResolution::RoleUnion);
        assert!(ctx.is_member);
        assert!(ctx.has_any(&["add-role", "view-roster"]));
        assert!(!ctx.has("add-role"));
    }
}
