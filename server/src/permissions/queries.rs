//! `PostgreSQL` implementation of [`AccessStore`].
//!
//! Multi-statement operations run in one transaction. Replace-set syncs lock
//! the owning row with `FOR UPDATE` before reading the current set, so two
//! syncs of the same owner serialize and the later commit wins.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::error::{AccessError, AccessResult};
use super::models::{
    Character, Guild, GuildMember, GuildRole, Permission, PermissionGroup, Scope, SiteRole, User,
};
use super::resolver::{GuildGrants, GuildRoleGrant, MembershipGrant, SiteGrants, SiteRoleGrant};
use super::store::{
    AccessStore, CharacterDirectory, GroupDeletion, GroupDraft, GroupPatch, GuildDirectory,
    GuildRoleDraft, GuildRolePatch, PermissionDraft, PermissionPatch, SiteRoleDraft,
    SiteRolePatch, UserDirectory,
};
use super::sync::SyncPlan;
use super::well_known::PROTECTED_GUILD_ROLE_SLUGS;

/// SQLSTATE for integer overflow, e.g. `MAX(priority) + 1`.
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

/// Store backed by a `PgPool`.
#[derive(Debug, Clone)]
pub struct PgAccessStore {
    pool: PgPool,
}

impl PgAccessStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Join tables
// ============================================================================

/// Join tables that are synchronized as replace-sets.
#[derive(Debug, Clone, Copy)]
enum Link {
    RolePermission,
    UserRole,
    UserPermission,
    GuildRolePermission,
}

impl Link {
    const fn table(self) -> &'static str {
        match self {
            Self::RolePermission => "role_permission",
            Self::UserRole => "user_role",
            Self::UserPermission => "user_permission",
            Self::GuildRolePermission => "guild_role_permission",
        }
    }

    const fn owner_column(self) -> &'static str {
        match self {
            Self::RolePermission => "role_id",
            Self::UserRole | Self::UserPermission => "user_id",
            Self::GuildRolePermission => "guild_role_id",
        }
    }

    const fn target_column(self) -> &'static str {
        match self {
            Self::UserRole => "role_id",
            Self::RolePermission | Self::UserPermission | Self::GuildRolePermission => {
                "permission_id"
            }
        }
    }

    /// Entity reported when an attached id does not exist.
    const fn target_entity(self) -> &'static str {
        match self {
            Self::UserRole => "Site role",
            Self::RolePermission | Self::UserPermission | Self::GuildRolePermission => {
                "Permission"
            }
        }
    }
}

/// Diff the owner's current set against `desired` and write only the changes.
///
/// The caller must hold a lock on the owner row.
async fn sync_link(
    conn: &mut PgConnection,
    link: Link,
    owner_id: Uuid,
    desired: &[Uuid],
) -> AccessResult<SyncPlan> {
    let (table, owner, target) = (link.table(), link.owner_column(), link.target_column());

    let current: Vec<Uuid> =
        sqlx::query_scalar(&format!("SELECT {target} FROM {table} WHERE {owner} = $1"))
            .bind(owner_id)
            .fetch_all(&mut *conn)
            .await?;

    let plan = SyncPlan::compute(&current, desired);

    if !plan.detach.is_empty() {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE {owner} = $1 AND {target} = ANY($2)"
        ))
        .bind(owner_id)
        .bind(&plan.detach)
        .execute(&mut *conn)
        .await?;
    }

    if !plan.attach.is_empty() {
        sqlx::query(&format!(
            "INSERT INTO {table} ({owner}, {target}) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING"
        ))
        .bind(owner_id)
        .bind(&plan.attach)
        .execute(&mut *conn)
        .await
        .map_err(|e| referenced_error(e, link.target_entity()))?;
    }

    tracing::debug!(
        table,
        %owner_id,
        attached = plan.attach.len(),
        detached = plan.detach.len(),
        "Synced join table"
    );

    Ok(plan)
}

/// Foreign key violations name the referenced entity; the rest falls back
/// to [`AccessError::from_write`].
fn referenced_error(err: sqlx::Error, referenced: &'static str) -> AccessError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            AccessError::NotFound(referenced)
        }
        _ => AccessError::from_write(err, referenced),
    }
}

fn member_write_error(err: sqlx::Error) -> AccessError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AccessError::Validation("Character already belongs to a guild".to_string());
        }
        if db_err.is_foreign_key_violation() {
            return AccessError::NotFound(match db_err.constraint() {
                Some("guild_members_guild_id_fkey") => "Guild",
                Some("guild_members_character_id_fkey") => "Character",
                _ => "Guild role",
            });
        }
    }
    AccessError::Database(err)
}

/// Group `(owner, slug)` rows by owner, keeping row order.
fn group_slugs(rows: Vec<(Uuid, String)>) -> HashMap<Uuid, Vec<String>> {
    let mut grouped: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (owner, slug) in rows {
        grouped.entry(owner).or_default().push(slug);
    }
    grouped
}

// ============================================================================
// Directories
// ============================================================================

#[async_trait]
impl UserDirectory for PgAccessStore {
    async fn find_user(&self, user_id: Uuid) -> AccessResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn characters_of_user(&self, user_id: Uuid) -> AccessResult<Vec<Character>> {
        Ok(sqlx::query_as::<_, Character>(
            "SELECT id, user_id, name FROM characters WHERE user_id = $1 ORDER BY name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl GuildDirectory for PgAccessStore {
    async fn find_guild(&self, guild_id: Uuid) -> AccessResult<Option<Guild>> {
        Ok(sqlx::query_as::<_, Guild>(
            "SELECT id, name, owner_id, leader_character_id FROM guilds WHERE id = $1",
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl CharacterDirectory for PgAccessStore {
    async fn find_character(&self, character_id: Uuid) -> AccessResult<Option<Character>> {
        Ok(sqlx::query_as::<_, Character>(
            "SELECT id, user_id, name FROM characters WHERE id = $1",
        )
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn membership_of(&self, character_id: Uuid) -> AccessResult<Option<GuildMember>> {
        Ok(sqlx::query_as::<_, GuildMember>(
            r"
            SELECT id, guild_id, character_id, guild_role_id, joined_at
            FROM guild_members
            WHERE character_id = $1
            ",
        )
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
impl AccessStore for PgAccessStore {
    // --- Catalog ---

    async fn insert_group(&self, draft: GroupDraft) -> AccessResult<PermissionGroup> {
        sqlx::query_as::<_, PermissionGroup>(
            r"
            INSERT INTO permission_groups (id, name, slug, scope)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, slug, scope, created_at, updated_at
            ",
        )
        .bind(Uuid::now_v7())
        .bind(&draft.name)
        .bind(&draft.slug)
        .bind(draft.scope)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AccessError::from_write(e, "Permission group"))
    }

    async fn find_group(&self, group_id: Uuid) -> AccessResult<Option<PermissionGroup>> {
        Ok(sqlx::query_as::<_, PermissionGroup>(
            r"
            SELECT id, name, slug, scope, created_at, updated_at
            FROM permission_groups
            WHERE id = $1
            ",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_group_by_slug(
        &self,
        scope: Scope,
        slug: &str,
    ) -> AccessResult<Option<PermissionGroup>> {
        Ok(sqlx::query_as::<_, PermissionGroup>(
            r"
            SELECT id, name, slug, scope, created_at, updated_at
            FROM permission_groups
            WHERE scope = $1 AND slug = $2
            ",
        )
        .bind(scope)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_group(
        &self,
        group_id: Uuid,
        patch: GroupPatch,
    ) -> AccessResult<Option<PermissionGroup>> {
        sqlx::query_as::<_, PermissionGroup>(
            r"
            UPDATE permission_groups SET
                name = COALESCE($2, name),
                slug = COALESCE($3, slug),
                scope = COALESCE($4, scope),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, slug, scope, created_at, updated_at
            ",
        )
        .bind(group_id)
        .bind(patch.name)
        .bind(patch.slug)
        .bind(patch.scope)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::from_write(e, "Permission group"))
    }

    async fn delete_group(&self, group_id: Uuid) -> AccessResult<GroupDeletion> {
        let mut tx = self.pool.begin().await?;

        // Blocks concurrent permission inserts that reference the group.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM permission_groups WHERE id = $1 FOR UPDATE")
                .bind(group_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Ok(GroupDeletion::Missing);
        }

        let (has_permissions,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM permissions WHERE group_id = $1)")
                .bind(group_id)
                .fetch_one(&mut *tx)
                .await?;
        if has_permissions {
            return Ok(GroupDeletion::HasPermissions);
        }

        sqlx::query("DELETE FROM permission_groups WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(GroupDeletion::Deleted)
    }

    async fn insert_permission(&self, draft: PermissionDraft) -> AccessResult<Permission> {
        sqlx::query_as::<_, Permission>(
            r"
            INSERT INTO permissions (id, name, slug, scope, description, group_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, slug, scope, description, group_id, created_at, updated_at
            ",
        )
        .bind(Uuid::now_v7())
        .bind(&draft.name)
        .bind(&draft.slug)
        .bind(draft.scope)
        .bind(&draft.description)
        .bind(draft.group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AccessError::NotFound("Permission group")
            }
            _ => AccessError::from_write(e, "Permission"),
        })
    }

    async fn find_permission(&self, permission_id: Uuid) -> AccessResult<Option<Permission>> {
        Ok(sqlx::query_as::<_, Permission>(
            r"
            SELECT id, name, slug, scope, description, group_id, created_at, updated_at
            FROM permissions
            WHERE id = $1
            ",
        )
        .bind(permission_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_permission_by_slug(
        &self,
        scope: Scope,
        slug: &str,
    ) -> AccessResult<Option<Permission>> {
        Ok(sqlx::query_as::<_, Permission>(
            r"
            SELECT id, name, slug, scope, description, group_id, created_at, updated_at
            FROM permissions
            WHERE scope = $1 AND slug = $2
            ",
        )
        .bind(scope)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_permissions(&self, ids: &[Uuid]) -> AccessResult<Vec<Permission>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(sqlx::query_as::<_, Permission>(
            r"
            SELECT id, name, slug, scope, description, group_id, created_at, updated_at
            FROM permissions
            WHERE id = ANY($1)
            ORDER BY group_id, name
            ",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_permission(
        &self,
        permission_id: Uuid,
        patch: PermissionPatch,
    ) -> AccessResult<Option<Permission>> {
        let (group_id, scope) = patch.regroup.unzip();
        let mut tx = self.pool.begin().await?;

        let permission = sqlx::query_as::<_, Permission>(
            r"
            UPDATE permissions SET
                name = COALESCE($2, name),
                slug = COALESCE($3, slug),
                description = COALESCE($4, description),
                group_id = COALESCE($5, group_id),
                scope = COALESCE($6, scope),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, slug, scope, description, group_id, created_at, updated_at
            ",
        )
        .bind(permission_id)
        .bind(patch.name)
        .bind(patch.slug)
        .bind(patch.description)
        .bind(group_id)
        .bind(scope)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AccessError::NotFound("Permission group")
            }
            _ => AccessError::from_write(e, "Permission"),
        })?;

        // Guild roles may only hold Guild-scope permissions.
        if let Some(permission) = &permission {
            if permission.scope == Scope::Site {
                sqlx::query("DELETE FROM guild_role_permission WHERE permission_id = $1")
                    .bind(permission_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(permission)
    }

    async fn delete_permission(&self, permission_id: Uuid) -> AccessResult<bool> {
        // Join rows go with it (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions(&self, scope: Option<Scope>) -> AccessResult<Vec<Permission>> {
        Ok(sqlx::query_as::<_, Permission>(
            r"
            SELECT id, name, slug, scope, description, group_id, created_at, updated_at
            FROM permissions
            WHERE $1::permission_scope IS NULL OR scope = $1
            ORDER BY group_id, name
            ",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?)
    }

    // --- Site roles ---

    async fn insert_site_role(
        &self,
        draft: SiteRoleDraft,
        permission_ids: &[Uuid],
    ) -> AccessResult<SiteRole> {
        let mut tx = self.pool.begin().await?;

        let role = sqlx::query_as::<_, SiteRole>(
            r"
            INSERT INTO roles (id, name, slug, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, slug, description, created_at, updated_at
            ",
        )
        .bind(Uuid::now_v7())
        .bind(&draft.name)
        .bind(&draft.slug)
        .bind(&draft.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AccessError::from_write(e, "Site role"))?;

        sync_link(&mut tx, Link::RolePermission, role.id, permission_ids).await?;
        tx.commit().await?;

        Ok(role)
    }

    async fn find_site_role(&self, role_id: Uuid) -> AccessResult<Option<SiteRole>> {
        Ok(sqlx::query_as::<_, SiteRole>(
            "SELECT id, name, slug, description, created_at, updated_at FROM roles WHERE id = $1",
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_site_roles(&self, ids: &[Uuid]) -> AccessResult<Vec<SiteRole>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(sqlx::query_as::<_, SiteRole>(
            r"
            SELECT id, name, slug, description, created_at, updated_at
            FROM roles
            WHERE id = ANY($1)
            ORDER BY name
            ",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_site_role(
        &self,
        role_id: Uuid,
        patch: SiteRolePatch,
        permission_ids: Option<&[Uuid]>,
    ) -> AccessResult<Option<SiteRole>> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
                .bind(role_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Ok(None);
        }

        if let Some(ids) = permission_ids {
            sync_link(&mut tx, Link::RolePermission, role_id, ids).await?;
        }

        let role = sqlx::query_as::<_, SiteRole>(
            r"
            UPDATE roles SET
                name = COALESCE($2, name),
                slug = COALESCE($3, slug),
                description = COALESCE($4, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, slug, description, created_at, updated_at
            ",
        )
        .bind(role_id)
        .bind(patch.name)
        .bind(patch.slug)
        .bind(patch.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AccessError::from_write(e, "Site role"))?;

        tx.commit().await?;
        Ok(Some(role))
    }

    async fn delete_site_role(&self, role_id: Uuid) -> AccessResult<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn site_role_permissions(&self, role_id: Uuid) -> AccessResult<Vec<Permission>> {
        Ok(sqlx::query_as::<_, Permission>(
            r"
            SELECT p.id, p.name, p.slug, p.scope, p.description, p.group_id,
                   p.created_at, p.updated_at
            FROM permissions p
            INNER JOIN role_permission rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.group_id, p.name
            ",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // --- Guild roles ---

    async fn insert_guild_role(&self, draft: GuildRoleDraft) -> AccessResult<GuildRole> {
        sqlx::query_as::<_, GuildRole>(
            r"
            INSERT INTO guild_roles (id, guild_id, name, slug, priority)
            VALUES (
                $1, $2, $3, $4,
                COALESCE($5, (SELECT MAX(priority) + 1 FROM guild_roles WHERE guild_id = $2), 0)
            )
            RETURNING id, guild_id, name, slug, priority, created_at, updated_at
            ",
        )
        .bind(Uuid::now_v7())
        .bind(draft.guild_id)
        .bind(&draft.name)
        .bind(&draft.slug)
        .bind(draft.priority)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AccessError::NotFound("Guild")
            }
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE) =>
            {
                AccessError::Validation("Guild role priority out of range".to_string())
            }
            _ => AccessError::from_write(e, "Guild role"),
        })
    }

    async fn find_guild_role(&self, role_id: Uuid) -> AccessResult<Option<GuildRole>> {
        Ok(sqlx::query_as::<_, GuildRole>(
            r"
            SELECT id, guild_id, name, slug, priority, created_at, updated_at
            FROM guild_roles
            WHERE id = $1
            ",
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_guild_role_by_slug(
        &self,
        guild_id: Uuid,
        slug: &str,
    ) -> AccessResult<Option<GuildRole>> {
        Ok(sqlx::query_as::<_, GuildRole>(
            r"
            SELECT id, guild_id, name, slug, priority, created_at, updated_at
            FROM guild_roles
            WHERE guild_id = $1 AND slug = $2
            ",
        )
        .bind(guild_id)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_guild_role(
        &self,
        role_id: Uuid,
        patch: GuildRolePatch,
    ) -> AccessResult<Option<GuildRole>> {
        sqlx::query_as::<_, GuildRole>(
            r"
            UPDATE guild_roles SET
                name = COALESCE($2, name),
                slug = COALESCE($3, slug),
                priority = COALESCE($4, priority),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, guild_id, name, slug, priority, created_at, updated_at
            ",
        )
        .bind(role_id)
        .bind(patch.name)
        .bind(patch.slug)
        .bind(patch.priority)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::from_write(e, "Guild role"))
    }

    async fn delete_guild_role(&self, role_id: Uuid) -> AccessResult<bool> {
        // Members holding the role fall back to none (ON DELETE SET NULL).
        let result = sqlx::query("DELETE FROM guild_roles WHERE id = $1 AND slug <> ALL($2)")
            .bind(role_id)
            .bind(&PROTECTED_GUILD_ROLE_SLUGS[..])
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_guild_roles(&self, guild_id: Uuid) -> AccessResult<Vec<GuildRole>> {
        Ok(sqlx::query_as::<_, GuildRole>(
            r"
            SELECT id, guild_id, name, slug, priority, created_at, updated_at
            FROM guild_roles
            WHERE guild_id = $1
            ORDER BY priority DESC, name ASC
            ",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn replace_guild_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> AccessResult<SyncPlan> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM guild_roles WHERE id = $1 FOR UPDATE")
                .bind(role_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AccessError::NotFound("Guild role"));
        }

        let plan = sync_link(&mut tx, Link::GuildRolePermission, role_id, permission_ids).await?;
        tx.commit().await?;

        Ok(plan)
    }

    async fn guild_role_permissions(&self, role_id: Uuid) -> AccessResult<Vec<Permission>> {
        Ok(sqlx::query_as::<_, Permission>(
            r"
            SELECT p.id, p.name, p.slug, p.scope, p.description, p.group_id,
                   p.created_at, p.updated_at
            FROM permissions p
            INNER JOIN guild_role_permission grp ON grp.permission_id = p.id
            WHERE grp.guild_role_id = $1
            ORDER BY p.group_id, p.name
            ",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // --- Membership index ---

    async fn insert_member(
        &self,
        guild_id: Uuid,
        character_id: Uuid,
        role_id: Option<Uuid>,
    ) -> AccessResult<GuildMember> {
        sqlx::query_as::<_, GuildMember>(
            r"
            INSERT INTO guild_members (id, guild_id, character_id, guild_role_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, guild_id, character_id, guild_role_id, joined_at
            ",
        )
        .bind(Uuid::now_v7())
        .bind(guild_id)
        .bind(character_id)
        .bind(role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(member_write_error)
    }

    async fn find_member(&self, member_id: Uuid) -> AccessResult<Option<GuildMember>> {
        Ok(sqlx::query_as::<_, GuildMember>(
            r"
            SELECT id, guild_id, character_id, guild_role_id, joined_at
            FROM guild_members
            WHERE id = $1
            ",
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_member_role(
        &self,
        member_id: Uuid,
        role_id: Option<Uuid>,
    ) -> AccessResult<Option<GuildMember>> {
        sqlx::query_as::<_, GuildMember>(
            r"
            UPDATE guild_members SET guild_role_id = $2
            WHERE id = $1
            RETURNING id, guild_id, character_id, guild_role_id, joined_at
            ",
        )
        .bind(member_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(member_write_error)
    }

    async fn delete_member(&self, member_id: Uuid) -> AccessResult<bool> {
        let result = sqlx::query("DELETE FROM guild_members WHERE id = $1")
            .bind(member_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_members(&self, guild_id: Uuid) -> AccessResult<Vec<GuildMember>> {
        Ok(sqlx::query_as::<_, GuildMember>(
            r"
            SELECT id, guild_id, character_id, guild_role_id, joined_at
            FROM guild_members
            WHERE guild_id = $1
            ORDER BY joined_at, id
            ",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // --- Users ---

    async fn replace_user_access(
        &self,
        user_id: Uuid,
        role_ids: Option<&[Uuid]>,
        permission_ids: Option<&[Uuid]>,
    ) -> AccessResult<()> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AccessError::NotFound("User"));
        }

        if let Some(ids) = role_ids {
            sync_link(&mut tx, Link::UserRole, user_id, ids).await?;
        }
        if let Some(ids) = permission_ids {
            sync_link(&mut tx, Link::UserPermission, user_id, ids).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn user_roles(&self, user_id: Uuid) -> AccessResult<Vec<SiteRole>> {
        Ok(sqlx::query_as::<_, SiteRole>(
            r"
            SELECT r.id, r.name, r.slug, r.description, r.created_at, r.updated_at
            FROM roles r
            INNER JOIN user_role ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn user_permissions(&self, user_id: Uuid) -> AccessResult<Vec<Permission>> {
        Ok(sqlx::query_as::<_, Permission>(
            r"
            SELECT p.id, p.name, p.slug, p.scope, p.description, p.group_id,
                   p.created_at, p.updated_at
            FROM permissions p
            INNER JOIN user_permission up ON up.permission_id = p.id
            WHERE up.user_id = $1
            ORDER BY p.group_id, p.name
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // --- Snapshots ---

    async fn load_site_grants(&self, user_id: Uuid) -> AccessResult<SiteGrants> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let roles: Vec<(Uuid, String)> = sqlx::query_as(
            r"
            SELECT r.id, r.slug
            FROM roles r
            INNER JOIN user_role ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.slug
            ",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let role_ids: Vec<Uuid> = roles.iter().map(|(id, _)| *id).collect();
        let role_slugs: Vec<(Uuid, String)> = sqlx::query_as(
            r"
            SELECT rp.role_id, p.slug
            FROM role_permission rp
            INNER JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            ORDER BY p.group_id, p.name
            ",
        )
        .bind(&role_ids)
        .fetch_all(&mut *tx)
        .await?;

        let direct_slugs: Vec<String> = sqlx::query_scalar(
            r"
            SELECT p.slug
            FROM user_permission up
            INNER JOIN permissions p ON p.id = up.permission_id
            WHERE up.user_id = $1
            ORDER BY p.group_id, p.name
            ",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut by_role = group_slugs(role_slugs);
        let roles = roles
            .into_iter()
            .map(|(role_id, slug)| SiteRoleGrant {
                role_id,
                slug,
                permission_slugs: by_role.remove(&role_id).unwrap_or_default(),
            })
            .collect();

        Ok(SiteGrants {
            user_id,
            roles,
            direct_slugs,
        })
    }

    async fn load_guild_grants(
        &self,
        user_id: Uuid,
        guild_id: Uuid,
    ) -> AccessResult<Option<GuildGrants>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let guild: Option<(Uuid, Option<Uuid>)> = sqlx::query_as(
            r"
            SELECT g.id, c.user_id
            FROM guilds g
            LEFT JOIN characters c ON c.id = g.leader_character_id
            WHERE g.id = $1
            ",
        )
        .bind(guild_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((_, leader_user_id)) = guild else {
            return Ok(None);
        };

        let guild_catalog: Vec<String> =
            sqlx::query_scalar("SELECT slug FROM permissions WHERE scope = $1 ORDER BY slug")
                .bind(Scope::Guild)
                .fetch_all(&mut *tx)
                .await?;

        let rows: Vec<(Uuid, Uuid, Uuid, Option<Uuid>, Option<String>)> = sqlx::query_as(
            r"
            SELECT m.id, m.character_id, c.user_id, gr.id, gr.slug
            FROM guild_members m
            INNER JOIN characters c ON c.id = m.character_id
            LEFT JOIN guild_roles gr ON gr.id = m.guild_role_id
            WHERE m.guild_id = $1 AND c.user_id = $2
            ORDER BY m.id
            ",
        )
        .bind(guild_id)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let role_ids: Vec<Uuid> = rows.iter().filter_map(|row| row.3).collect();
        let role_slugs: Vec<(Uuid, String)> = sqlx::query_as(
            r"
            SELECT grp.guild_role_id, p.slug
            FROM guild_role_permission grp
            INNER JOIN permissions p ON p.id = grp.permission_id
            WHERE grp.guild_role_id = ANY($1) AND p.scope = $2
            ORDER BY p.group_id, p.name
            ",
        )
        .bind(&role_ids)
        .bind(Scope::Guild)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let by_role = group_slugs(role_slugs);
        let memberships = rows
            .into_iter()
            .map(
                |(member_id, character_id, owner_user_id, role_id, role_slug)| MembershipGrant {
                    member_id,
                    character_id,
                    owner_user_id,
                    role: role_id.zip(role_slug).map(|(role_id, slug)| GuildRoleGrant {
                        role_id,
                        slug,
                        permission_slugs: by_role.get(&role_id).cloned().unwrap_or_default(),
                    }),
                },
            )
            .collect();

        Ok(Some(GuildGrants {
            guild_id,
            leader_user_id,
            guild_catalog,
            memberships,
        }))
    }
}
