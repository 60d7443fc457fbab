//! Site-wide roles.
//!
//! Site roles attach permissions verbatim: no scope filtering happens here,
//! unlike guild roles. Unknown permission ids abort the whole operation.

use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::catalog::{checked_patch_slug, checked_slug, require_permissions};
use super::error::{AccessError, AccessResult};
use super::models::{NewSiteRole, SiteRole, SiteRoleWithPermissions, UpdateSiteRole};
use super::store::{AccessStore, SiteRoleDraft, SiteRolePatch};
use super::sync::dedup_ids;

async fn with_permissions<S: AccessStore + ?Sized>(
    store: &S,
    role: SiteRole,
) -> AccessResult<SiteRoleWithPermissions> {
    let permissions = store.site_role_permissions(role.id).await?;
    Ok(SiteRoleWithPermissions { role, permissions })
}

/// Create a role and attach the given permissions.
#[tracing::instrument(skip(store))]
pub async fn create_role<S: AccessStore + ?Sized>(
    store: &S,
    input: NewSiteRole,
) -> AccessResult<SiteRoleWithPermissions> {
    input.validate()?;
    let slug = checked_slug(input.slug.as_deref(), &input.name)?;
    let permission_ids = dedup_ids(&input.permission_ids);
    require_permissions(store, &permission_ids).await?;

    let role = store
        .insert_site_role(
            SiteRoleDraft {
                name: input.name,
                slug,
                description: input.description,
            },
            &permission_ids,
        )
        .await?;

    info!(
        role_id = %role.id,
        slug = %role.slug,
        permissions = permission_ids.len(),
        "Site role created"
    );
    with_permissions(store, role).await
}

/// Patch a role. When `permission_ids` is present the role's permission set
/// is replaced wholesale before the field changes are applied.
#[tracing::instrument(skip(store))]
pub async fn update_role<S: AccessStore + ?Sized>(
    store: &S,
    role_id: Uuid,
    input: UpdateSiteRole,
) -> AccessResult<SiteRoleWithPermissions> {
    input.validate()?;
    get_role(store, role_id).await?;

    let slug = checked_patch_slug(input.slug.as_deref())?;
    let permission_ids = input.permission_ids.as_deref().map(dedup_ids);
    if let Some(ids) = &permission_ids {
        require_permissions(store, ids).await?;
    }

    let role = store
        .update_site_role(
            role_id,
            SiteRolePatch {
                name: input.name,
                slug,
                description: input.description,
            },
            permission_ids.as_deref(),
        )
        .await?
        .ok_or(AccessError::NotFound("Site role"))?;

    info!(
        role_id = %role.id,
        synced = permission_ids.is_some(),
        "Site role updated"
    );
    with_permissions(store, role).await
}

/// Retire a role. Its permission links and user assignments go with it.
#[tracing::instrument(skip(store))]
pub async fn delete_role<S: AccessStore + ?Sized>(store: &S, role_id: Uuid) -> AccessResult<()> {
    if !store.delete_site_role(role_id).await? {
        return Err(AccessError::NotFound("Site role"));
    }
    info!(%role_id, "Site role deleted");
    Ok(())
}

pub async fn get_role<S: AccessStore + ?Sized>(
    store: &S,
    role_id: Uuid,
) -> AccessResult<SiteRoleWithPermissions> {
    let role = store
        .find_site_role(role_id)
        .await?
        .ok_or(AccessError::NotFound("Site role"))?;
    with_permissions(store, role).await
}
