//! Persistence seam for the permission engine.
//!
//! Every [`AccessStore`] method is one atomic unit: it either commits fully
//! or leaves no trace. Replace-set methods serialize on the owning row, so
//! concurrent syncs of the same owner resolve last-write-wins.

use async_trait::async_trait;
use uuid::Uuid;

use super::error::AccessResult;
use super::models::{
    Character, Guild, GuildMember, GuildRole, Permission, PermissionGroup, Scope, SiteRole, User,
};
use super::resolver::{GuildGrants, SiteGrants};
use super::sync::SyncPlan;

// ============================================================================
// Drafts and patches (validated, slugs already normalized)
// ============================================================================

#[derive(Debug, Clone)]
pub struct GroupDraft {
    pub name: String,
    pub slug: String,
    pub scope: Scope,
}

#[derive(Debug, Clone, Default)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub scope: Option<Scope>,
}

/// New permission. `scope` is copied from the owning group by the caller.
#[derive(Debug, Clone)]
pub struct PermissionDraft {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub group_id: Uuid,
    pub scope: Scope,
}

/// Permission patch. `group_id` and `scope` always change together.
#[derive(Debug, Clone, Default)]
pub struct PermissionPatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub regroup: Option<(Uuid, Scope)>,
}

#[derive(Debug, Clone)]
pub struct SiteRoleDraft {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SiteRolePatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
}

/// New guild role. A missing priority becomes `max(priority in guild) + 1`,
/// or 0 for the guild's first role.
#[derive(Debug, Clone)]
pub struct GuildRoleDraft {
    pub guild_id: Uuid,
    pub name: String,
    pub slug: String,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct GuildRolePatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub priority: Option<i32>,
}

/// Outcome of a guarded group deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDeletion {
    Deleted,
    HasPermissions,
    Missing,
}

// ============================================================================
// External collaborators
// ============================================================================

/// Resolves user identities and the characters they own.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> AccessResult<Option<User>>;

    async fn characters_of_user(&self, user_id: Uuid) -> AccessResult<Vec<Character>>;
}

/// Resolves guilds, including their leader pointer.
#[async_trait]
pub trait GuildDirectory: Send + Sync {
    async fn find_guild(&self, guild_id: Uuid) -> AccessResult<Option<Guild>>;
}

/// Resolves characters and their membership rows.
#[async_trait]
pub trait CharacterDirectory: Send + Sync {
    async fn find_character(&self, character_id: Uuid) -> AccessResult<Option<Character>>;

    async fn membership_of(&self, character_id: Uuid) -> AccessResult<Option<GuildMember>>;
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
pub trait AccessStore: UserDirectory + GuildDirectory + CharacterDirectory {
    // --- Catalog ---

    async fn insert_group(&self, draft: GroupDraft) -> AccessResult<PermissionGroup>;

    async fn find_group(&self, group_id: Uuid) -> AccessResult<Option<PermissionGroup>>;

    async fn find_group_by_slug(
        &self,
        scope: Scope,
        slug: &str,
    ) -> AccessResult<Option<PermissionGroup>>;

    async fn update_group(
        &self,
        group_id: Uuid,
        patch: GroupPatch,
    ) -> AccessResult<Option<PermissionGroup>>;

    /// Delete the group only if it owns no permissions.
    async fn delete_group(&self, group_id: Uuid) -> AccessResult<GroupDeletion>;

    async fn insert_permission(&self, draft: PermissionDraft) -> AccessResult<Permission>;

    async fn find_permission(&self, permission_id: Uuid) -> AccessResult<Option<Permission>>;

    async fn find_permission_by_slug(
        &self,
        scope: Scope,
        slug: &str,
    ) -> AccessResult<Option<Permission>>;

    /// Existing permissions among `ids`; unknown ids are skipped.
    async fn find_permissions(&self, ids: &[Uuid]) -> AccessResult<Vec<Permission>>;

    /// Patch a permission. A move into a Site-scope group also detaches it
    /// from every guild role, in the same transaction.
    async fn update_permission(
        &self,
        permission_id: Uuid,
        patch: PermissionPatch,
    ) -> AccessResult<Option<Permission>>;

    /// Delete a permission and every role/user attachment of it.
    async fn delete_permission(&self, permission_id: Uuid) -> AccessResult<bool>;

    /// Permissions ordered by group id, then name.
    async fn list_permissions(&self, scope: Option<Scope>) -> AccessResult<Vec<Permission>>;

    // --- Site roles ---

    /// Insert a role and attach `permission_ids` in one transaction.
    async fn insert_site_role(
        &self,
        draft: SiteRoleDraft,
        permission_ids: &[Uuid],
    ) -> AccessResult<SiteRole>;

    async fn find_site_role(&self, role_id: Uuid) -> AccessResult<Option<SiteRole>>;

    async fn find_site_roles(&self, ids: &[Uuid]) -> AccessResult<Vec<SiteRole>>;

    /// Sync permissions (when given) and patch fields in one transaction.
    async fn update_site_role(
        &self,
        role_id: Uuid,
        patch: SiteRolePatch,
        permission_ids: Option<&[Uuid]>,
    ) -> AccessResult<Option<SiteRole>>;

    async fn delete_site_role(&self, role_id: Uuid) -> AccessResult<bool>;

    async fn site_role_permissions(&self, role_id: Uuid) -> AccessResult<Vec<Permission>>;

    // --- Guild roles ---

    async fn insert_guild_role(&self, draft: GuildRoleDraft) -> AccessResult<GuildRole>;

    async fn find_guild_role(&self, role_id: Uuid) -> AccessResult<Option<GuildRole>>;

    async fn find_guild_role_by_slug(
        &self,
        guild_id: Uuid,
        slug: &str,
    ) -> AccessResult<Option<GuildRole>>;

    async fn update_guild_role(
        &self,
        role_id: Uuid,
        patch: GuildRolePatch,
    ) -> AccessResult<Option<GuildRole>>;

    /// Delete a guild role unless its slug is protected. Members holding it
    /// are left without a role.
    async fn delete_guild_role(&self, role_id: Uuid) -> AccessResult<bool>;

    /// Roles of a guild, priority descending then name ascending.
    async fn list_guild_roles(&self, guild_id: Uuid) -> AccessResult<Vec<GuildRole>>;

    /// Replace the role's permission set with `permission_ids`.
    async fn replace_guild_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> AccessResult<SyncPlan>;

    async fn guild_role_permissions(&self, role_id: Uuid) -> AccessResult<Vec<Permission>>;

    // --- Membership index ---

    async fn insert_member(
        &self,
        guild_id: Uuid,
        character_id: Uuid,
        role_id: Option<Uuid>,
    ) -> AccessResult<GuildMember>;

    async fn find_member(&self, member_id: Uuid) -> AccessResult<Option<GuildMember>>;

    async fn set_member_role(
        &self,
        member_id: Uuid,
        role_id: Option<Uuid>,
    ) -> AccessResult<Option<GuildMember>>;

    async fn delete_member(&self, member_id: Uuid) -> AccessResult<bool>;

    async fn list_members(&self, guild_id: Uuid) -> AccessResult<Vec<GuildMember>>;

    // --- Users ---

    /// Replace the user's roles and/or direct grants in one transaction.
    async fn replace_user_access(
        &self,
        user_id: Uuid,
        role_ids: Option<&[Uuid]>,
        permission_ids: Option<&[Uuid]>,
    ) -> AccessResult<()>;

    async fn user_roles(&self, user_id: Uuid) -> AccessResult<Vec<SiteRole>>;

    async fn user_permissions(&self, user_id: Uuid) -> AccessResult<Vec<Permission>>;

    // --- Snapshots for the resolver ---

    /// Site roles and direct grants of a user, read from one snapshot.
    async fn load_site_grants(&self, user_id: Uuid) -> AccessResult<SiteGrants>;

    /// Guild leader, Guild-scope catalog and the user's memberships, read
    /// from one snapshot. `None` if the guild does not exist.
    async fn load_guild_grants(
        &self,
        user_id: Uuid,
        guild_id: Uuid,
    ) -> AccessResult<Option<GuildGrants>>;
}
