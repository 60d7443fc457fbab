//! Permission catalog: groups and the permissions they own.
//!
//! A permission never carries its own scope; it is copied from the owning
//! group whenever the permission is created or moved to another group.

use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::error::{AccessError, AccessResult, BusinessRule};
use super::models::{
    NewPermission, NewPermissionGroup, Permission, PermissionGroup, Scope, UpdatePermission,
    UpdatePermissionGroup,
};
use super::store::{
    AccessStore, GroupDeletion, GroupDraft, GroupPatch, PermissionDraft, PermissionPatch,
};
use super::sync::dedup_ids;
use super::well_known::GuildPermission;
use crate::util::{slug_or_from_name, slugify};

/// Slug of the group seeded by [`ensure_guild_admin_catalog`].
pub const GUILD_ADMIN_GROUP_SLUG: &str = "guild-management";

/// Normalized slug for a new entity; fails if nothing usable is left.
pub(crate) fn checked_slug(explicit: Option<&str>, name: &str) -> AccessResult<String> {
    let slug = slug_or_from_name(explicit, name);
    if slug.is_empty() {
        return Err(AccessError::Validation(
            "Slug must contain at least one letter or digit".to_string(),
        ));
    }
    Ok(slug)
}

/// Normalized slug for a patch. `None` leaves the slug unchanged.
pub(crate) fn checked_patch_slug(slug: Option<&str>) -> AccessResult<Option<String>> {
    slug.map(|raw| checked_slug(Some(raw), raw)).transpose()
}

#[tracing::instrument(skip(store))]
pub async fn create_group<S: AccessStore + ?Sized>(
    store: &S,
    input: NewPermissionGroup,
) -> AccessResult<PermissionGroup> {
    input.validate()?;
    let slug = checked_slug(input.slug.as_deref(), &input.name)?;

    let group = store
        .insert_group(GroupDraft {
            name: input.name,
            slug,
            scope: input.scope,
        })
        .await?;

    info!(group_id = %group.id, slug = %group.slug, scope = %group.scope, "Permission group created");
    Ok(group)
}

pub async fn get_group<S: AccessStore + ?Sized>(
    store: &S,
    group_id: Uuid,
) -> AccessResult<PermissionGroup> {
    store
        .find_group(group_id)
        .await?
        .ok_or(AccessError::NotFound("Permission group"))
}

/// Patch a group. Permissions already in the group keep their scope even
/// when the group's scope changes.
#[tracing::instrument(skip(store))]
pub async fn update_group<S: AccessStore + ?Sized>(
    store: &S,
    group_id: Uuid,
    input: UpdatePermissionGroup,
) -> AccessResult<PermissionGroup> {
    input.validate()?;
    let patch = GroupPatch {
        slug: checked_patch_slug(input.slug.as_deref())?,
        name: input.name,
        scope: input.scope,
    };

    let group = store
        .update_group(group_id, patch)
        .await?
        .ok_or(AccessError::NotFound("Permission group"))?;

    info!(group_id = %group.id, "Permission group updated");
    Ok(group)
}

/// Delete a group that owns no permissions.
#[tracing::instrument(skip(store))]
pub async fn delete_group<S: AccessStore + ?Sized>(store: &S, group_id: Uuid) -> AccessResult<()> {
    match store.delete_group(group_id).await? {
        GroupDeletion::Deleted => {
            info!(%group_id, "Permission group deleted");
            Ok(())
        }
        GroupDeletion::HasPermissions => {
            Err(AccessError::BusinessRule(BusinessRule::HasPermissions))
        }
        GroupDeletion::Missing => Err(AccessError::NotFound("Permission group")),
    }
}

#[tracing::instrument(skip(store))]
pub async fn create_permission<S: AccessStore + ?Sized>(
    store: &S,
    input: NewPermission,
) -> AccessResult<Permission> {
    input.validate()?;
    let slug = checked_slug(input.slug.as_deref(), &input.name)?;
    let group = get_group(store, input.group_id).await?;

    let permission = store
        .insert_permission(PermissionDraft {
            name: input.name,
            slug,
            description: input.description,
            group_id: group.id,
            scope: group.scope,
        })
        .await?;

    info!(
        permission_id = %permission.id,
        slug = %permission.slug,
        scope = %permission.scope,
        "Permission created"
    );
    Ok(permission)
}

pub async fn get_permission<S: AccessStore + ?Sized>(
    store: &S,
    permission_id: Uuid,
) -> AccessResult<Permission> {
    store
        .find_permission(permission_id)
        .await?
        .ok_or(AccessError::NotFound("Permission"))
}

/// Patch a permission. Moving it to another group recomputes its scope;
/// moving it into a Site-scope group drops it from every guild role.
#[tracing::instrument(skip(store))]
pub async fn update_permission<S: AccessStore + ?Sized>(
    store: &S,
    permission_id: Uuid,
    input: UpdatePermission,
) -> AccessResult<Permission> {
    input.validate()?;
    let slug = checked_patch_slug(input.slug.as_deref())?;

    let regroup = match input.group_id {
        Some(group_id) => {
            let group = get_group(store, group_id).await?;
            Some((group.id, group.scope))
        }
        None => None,
    };

    let permission = store
        .update_permission(
            permission_id,
            PermissionPatch {
                name: input.name,
                slug,
                description: input.description,
                regroup,
            },
        )
        .await?
        .ok_or(AccessError::NotFound("Permission"))?;

    info!(permission_id = %permission.id, scope = %permission.scope, "Permission updated");
    Ok(permission)
}

/// Delete a permission. Role and user attachments go with it.
#[tracing::instrument(skip(store))]
pub async fn delete_permission<S: AccessStore + ?Sized>(
    store: &S,
    permission_id: Uuid,
) -> AccessResult<()> {
    if !store.delete_permission(permission_id).await? {
        return Err(AccessError::NotFound("Permission"));
    }
    info!(%permission_id, "Permission deleted");
    Ok(())
}

/// Load every permission named in `ids`, failing if any of them is unknown.
pub(crate) async fn require_permissions<S: AccessStore + ?Sized>(
    store: &S,
    ids: &[Uuid],
) -> AccessResult<Vec<Permission>> {
    let ids = dedup_ids(ids);
    let found = store.find_permissions(&ids).await?;
    if found.len() != ids.len() {
        return Err(AccessError::NotFound("Permission"));
    }
    Ok(found)
}

/// Catalog listing ordered by group, then name.
pub async fn list_by_scope<S: AccessStore + ?Sized>(
    store: &S,
    scope: Option<Scope>,
) -> AccessResult<Vec<Permission>> {
    store.list_permissions(scope).await
}

/// Make sure the guild administration permissions exist.
///
/// Creates the `guild-management` Guild-scope group and any of the four
/// role-administration permissions that are missing. Safe to run repeatedly.
#[tracing::instrument(skip(store))]
pub async fn ensure_guild_admin_catalog<S: AccessStore + ?Sized>(
    store: &S,
) -> AccessResult<PermissionGroup> {
    let group = match store
        .find_group_by_slug(Scope::Guild, GUILD_ADMIN_GROUP_SLUG)
        .await?
    {
        Some(group) => group,
        None => {
            store
                .insert_group(GroupDraft {
                    name: "Guild Management".to_string(),
                    slug: GUILD_ADMIN_GROUP_SLUG.to_string(),
                    scope: Scope::Guild,
                })
                .await?
        }
    };

    let mut created = 0;
    for permission in GuildPermission::all() {
        let slug = permission.slug();
        if store
            .find_permission_by_slug(Scope::Guild, slug)
            .await?
            .is_some()
        {
            continue;
        }
        store
            .insert_permission(PermissionDraft {
                name: permission.name().to_string(),
                slug: slugify(slug),
                description: None,
                group_id: group.id,
                scope: Scope::Guild,
            })
            .await?;
        created += 1;
    }

    info!(group_id = %group.id, created, "Guild administration catalog ensured");
    Ok(group)
}
