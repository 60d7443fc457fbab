//! Permission slugs the engine itself depends on.
//!
//! The catalog is data, but a handful of slugs are referenced by code: the
//! site permissions guarding user access edits, the guild administration
//! slugs, and the guild role slugs that can never be deleted.

/// Guild role slugs exempt from deletion.
pub const PROTECTED_GUILD_ROLE_SLUGS: [&str; 2] = ["leader", "novice"];

/// Slug of the protected role held by the guild leader.
pub const LEADER_ROLE_SLUG: &str = "leader";

/// Slug of the protected entry-level role.
pub const NOVICE_ROLE_SLUG: &str = "novice";

/// Guild permissions handed to a guild leader while the guild-scope catalog
/// is still empty, so a freshly bootstrapped guild can administer its roles.
///
/// Whether this is a permanent safety net or a migration shim is unsettled;
/// the behavior is kept exactly as it is.
pub const FALLBACK_GUILD_PERMISSION_SLUGS: [&str; 4] = [
    GuildPermission::AddRole.slug(),
    GuildPermission::ChangeUserRole.slug(),
    GuildPermission::ChangeRolePermissions.slug(),
    GuildPermission::DeleteRole.slug(),
];

/// Site-scope permissions checked by code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitePermission {
    /// Change which site roles a user holds
    ChangeUserRoles,
    /// Change the permissions granted directly to a user
    ChangeUserPermissions,
}

impl SitePermission {
    /// Catalog slug of this permission.
    ///
    /// # Examples
    ///
    /// ```
    /// use warband_server::permissions::SitePermission;
    ///
    /// assert_eq!(SitePermission::ChangeUserRoles.slug(), "change-user-roles");
    /// ```
    #[must_use]
    pub const fn slug(&self) -> &'static str {
        match self {
            Self::ChangeUserRoles => "change-user-roles",
            Self::ChangeUserPermissions => "change-user-permissions",
        }
    }

    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::ChangeUserRoles, Self::ChangeUserPermissions]
    }

    /// Human-readable name used when seeding the catalog.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ChangeUserRoles => "Change user roles",
            Self::ChangeUserPermissions => "Change user permissions",
        }
    }
}

/// Guild-scope permissions controlling role administration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuildPermission {
    /// Create guild roles
    AddRole,
    /// Move members between guild roles
    ChangeUserRole,
    /// Edit the permission set of a guild role
    ChangeRolePermissions,
    /// Delete non-protected guild roles
    DeleteRole,
}

impl GuildPermission {
    #[must_use]
    pub const fn slug(&self) -> &'static str {
        match self {
            Self::AddRole => "add-role",
            Self::ChangeUserRole => "change-user-role",
            Self::ChangeRolePermissions => "change-role-permissions",
            Self::DeleteRole => "delete-role",
        }
    }

    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::AddRole,
            Self::ChangeUserRole,
            Self::ChangeRolePermissions,
            Self::DeleteRole,
        ]
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AddRole => "Add role",
            Self::ChangeUserRole => "Change user role",
            Self::ChangeRolePermissions => "Change role permissions",
            Self::DeleteRole => "Delete role",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_slugs_are_verbatim() {
        assert_eq!(
            FALLBACK_GUILD_PERMISSION_SLUGS,
            [
                "add-role",
                "change-user-role",
                "change-role-permissions",
                "delete-role"
            ]
        );
    }

    #[test]
    fn test_fallback_covers_every_guild_permission() {
        for perm in GuildPermission::all() {
            assert!(FALLBACK_GUILD_PERMISSION_SLUGS.contains(&perm.slug()));
        }
    }

    #[test]
    fn test_slugs_are_kebab_case() {
        let slugs = SitePermission::all()
            .iter()
            .map(|p| p.slug())
            .chain(GuildPermission::all().iter().map(|p| p.slug()));

        for slug in slugs {
            assert!(
                slug.chars().all(|c| c.is_ascii_lowercase() || c == '-'),
                "Slug '{}' should be kebab-case",
                slug
            );
            assert_eq!(crate::util::slugify(slug), slug);
        }
    }

    #[test]
    fn test_site_edit_slugs_are_distinct() {
        assert_ne!(
            SitePermission::ChangeUserRoles.slug(),
            SitePermission::ChangeUserPermissions.slug()
        );
    }

    #[test]
    fn test_leader_and_novice_are_protected() {
        assert!(PROTECTED_GUILD_ROLE_SLUGS.contains(&LEADER_ROLE_SLUG));
        assert!(PROTECTED_GUILD_ROLE_SLUGS.contains(&NOVICE_ROLE_SLUG));
    }
}
