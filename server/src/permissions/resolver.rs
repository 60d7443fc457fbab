//! Permission resolution logic.
//!
//! Computes the effective permission slugs for a user, either site-wide or in
//! a guild context. Everything here is pure: callers hand in association
//! graphs loaded from one consistent snapshot (see [`super::helpers`]).

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use super::well_known::FALLBACK_GUILD_PERMISSION_SLUGS;

/// Site role with the slugs of its permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRoleGrant {
    pub role_id: Uuid,
    pub slug: String,
    pub permission_slugs: Vec<String>,
}

/// Everything needed to resolve a user's site permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteGrants {
    pub user_id: Uuid,
    pub roles: Vec<SiteRoleGrant>,
    /// Slugs granted to the user directly, bypassing roles.
    pub direct_slugs: Vec<String>,
}

/// Guild role with the slugs of its permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildRoleGrant {
    pub role_id: Uuid,
    pub slug: String,
    pub permission_slugs: Vec<String>,
}

/// One membership row together with the owner of its character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipGrant {
    pub member_id: Uuid,
    pub character_id: Uuid,
    pub owner_user_id: Uuid,
    pub role: Option<GuildRoleGrant>,
}

/// Everything needed to resolve a user's permissions in one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildGrants {
    pub guild_id: Uuid,
    /// Owning user of the guild's leader character, if both exist.
    pub leader_user_id: Option<Uuid>,
    /// Every Guild-scope slug in the catalog.
    pub guild_catalog: Vec<String>,
    /// Membership rows in this guild held by the user's characters.
    pub memberships: Vec<MembershipGrant>,
}

/// Which path produced a guild permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuildResolution {
    /// The user controls the leader character; roles are bypassed.
    OwnerOverride,
    /// Union of the roles held by the user's memberships.
    RoleUnion,
}

/// Compute site permissions for a user.
///
/// Union of every role's permissions and the direct grants.
pub fn resolve_site_permissions(grants: &SiteGrants) -> HashSet<String> {
    grants
        .roles
        .iter()
        .flat_map(|role| role.permission_slugs.iter())
        .chain(grants.direct_slugs.iter())
        .cloned()
        .collect()
}

/// Decide which resolution path applies to `user_id`.
///
/// The override is checked first and needs no membership at all.
pub fn guild_resolution(user_id: Uuid, grants: &GuildGrants) -> GuildResolution {
    if grants.leader_user_id == Some(user_id) {
        GuildResolution::OwnerOverride
    } else {
        GuildResolution::RoleUnion
    }
}

/// Compute guild permissions for a user.
///
/// Resolution order:
/// 1. The user owning the leader character gets the whole Guild-scope catalog
///    (or the fallback set while the catalog is empty)
/// 2. Otherwise, union the permissions of the roles assigned to the user's
///    memberships in this guild
/// 3. No membership, or no membership with a role, yields the empty set
pub fn resolve_guild_permissions(user_id: Uuid, grants: &GuildGrants) -> HashSet<String> {
    match guild_resolution(user_id, grants) {
        GuildResolution::OwnerOverride => owner_override_permissions(&grants.guild_catalog),
        GuildResolution::RoleUnion => grants
            .memberships
            .iter()
            .filter(|membership| membership.owner_user_id == user_id)
            .filter_map(|membership| membership.role.as_ref())
            .flat_map(|role| role.permission_slugs.iter())
            .cloned()
            .collect(),
    }
}

/// Permission set granted by the ownership override.
pub fn owner_override_permissions(guild_catalog: &[String]) -> HashSet<String> {
    if guild_catalog.is_empty() {
        FALLBACK_GUILD_PERMISSION_SLUGS
            .iter()
            .map(|slug| (*slug).to_string())
            .collect()
    } else {
        guild_catalog.iter().cloned().collect()
    }
}

/// Whether any of the user's characters holds a membership in the guild.
pub fn is_guild_member(user_id: Uuid, grants: &GuildGrants) -> bool {
    grants
        .memberships
        .iter()
        .any(|membership| membership.owner_user_id == user_id)
}
