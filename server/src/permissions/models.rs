//! Database models for the permission system.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::well_known::PROTECTED_GUILD_ROLE_SLUGS;

/// Authorization namespace of a permission group and its permissions.
///
/// Site and guild permissions share one mechanism but never mix: a slug
/// only has meaning inside its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "permission_scope", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Site,
    Guild,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Site => "site",
            Self::Guild => "guild",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Permission group. Owns the scope its permissions inherit.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct PermissionGroup {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single capability, identified by `(scope, slug)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub scope: Scope,
    pub description: Option<String>,
    pub group_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Roles
// ============================================================================

/// Global (site-wide) role.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct SiteRole {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Site role with its permission set loaded.
#[derive(Debug, Clone, Serialize)]
pub struct SiteRoleWithPermissions {
    #[serde(flatten)]
    pub role: SiteRole,
    pub permissions: Vec<Permission>,
}

/// Per-guild role. Slugs are unique inside one guild only.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct GuildRole {
    pub id: Uuid,
    pub guild_id: Uuid,
    pub name: String,
    pub slug: String,
    /// Display ordering only, higher first.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GuildRole {
    /// `leader` and `novice` roles can never be deleted.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        is_protected_slug(&self.slug)
    }
}

/// Whether a guild role slug is one of the undeletable ones.
#[must_use]
pub fn is_protected_slug(slug: &str) -> bool {
    PROTECTED_GUILD_ROLE_SLUGS.contains(&slug)
}

/// Membership row: one per character, at most one guild role.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct GuildMember {
    pub id: Uuid,
    pub guild_id: Uuid,
    pub character_id: Uuid,
    pub guild_role_id: Option<Uuid>,
    pub joined_at: DateTime<Utc>,
}

// ============================================================================
// External collaborators
// ============================================================================

/// Identity as handed over by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Game character, owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Character {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Guild {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    /// Denormalized pointer to the character treated as guild leader.
    pub leader_character_id: Option<Uuid>,
}

/// User with site roles and direct grants loaded.
#[derive(Debug, Clone, Serialize)]
pub struct UserAccess {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<SiteRole>,
    pub permissions: Vec<Permission>,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPermissionGroup {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(max = 100, message = "Slug must be at most 100 characters"))]
    pub slug: Option<String>,
    pub scope: Scope,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePermissionGroup {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Slug must be 1-100 characters"))]
    pub slug: Option<String>,
    /// Existing permissions keep their scope when this changes.
    pub scope: Option<Scope>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPermission {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(max = 100, message = "Slug must be at most 100 characters"))]
    pub slug: Option<String>,
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePermission {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Slug must be 1-100 characters"))]
    pub slug: Option<String>,
    /// `None` keeps the current description; it cannot be cleared.
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewSiteRole {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(max = 100, message = "Slug must be at most 100 characters"))]
    pub slug: Option<String>,
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateSiteRole {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Slug must be 1-100 characters"))]
    pub slug: Option<String>,
    /// `None` keeps the current description; it cannot be cleared.
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
    /// When present, replaces the role's permission set wholesale.
    pub permission_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewGuildRole {
    pub guild_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(max = 100, message = "Slug must be at most 100 characters"))]
    pub slug: Option<String>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateGuildRole {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Slug must be 1-100 characters"))]
    pub slug: Option<String>,
    pub priority: Option<i32>,
}

/// Combined "update a user's roles and permissions" request.
///
/// `None` leaves the association untouched; `Some` replaces it wholesale.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserAccess {
    pub role_ids: Option<Vec<Uuid>>,
    pub permission_ids: Option<Vec<Uuid>>,
}
