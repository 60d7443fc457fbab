//! In-memory [`AccessStore`].
//!
//! All state sits behind one `RwLock`; every method holds the lock for its
//! whole body, which gives the same all-or-nothing behavior as a database
//! transaction. Reference checks happen before the first mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::{AccessError, AccessResult};
use super::models::{
    is_protected_slug, Character, Guild, GuildMember, GuildRole, Permission, PermissionGroup,
    Scope, SiteRole, User,
};
use super::resolver::{GuildGrants, GuildRoleGrant, MembershipGrant, SiteGrants, SiteRoleGrant};
use super::store::{
    AccessStore, CharacterDirectory, GroupDeletion, GroupDraft, GroupPatch, GuildDirectory,
    GuildRoleDraft, GuildRolePatch, PermissionDraft, PermissionPatch, SiteRoleDraft,
    SiteRolePatch, UserDirectory,
};
use super::sync::SyncPlan;

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    characters: HashMap<Uuid, Character>,
    guilds: HashMap<Uuid, Guild>,
    groups: HashMap<Uuid, PermissionGroup>,
    permissions: HashMap<Uuid, Permission>,
    site_roles: HashMap<Uuid, SiteRole>,
    role_permission: HashMap<Uuid, HashSet<Uuid>>,
    user_role: HashMap<Uuid, HashSet<Uuid>>,
    user_permission: HashMap<Uuid, HashSet<Uuid>>,
    guild_roles: HashMap<Uuid, GuildRole>,
    guild_role_permission: HashMap<Uuid, HashSet<Uuid>>,
    members: HashMap<Uuid, GuildMember>,
}

impl MemoryState {
    fn require_permissions(&self, ids: &[Uuid]) -> AccessResult<()> {
        if ids.iter().all(|id| self.permissions.contains_key(id)) {
            Ok(())
        } else {
            Err(AccessError::NotFound("Permission"))
        }
    }

    fn group_slug_taken(&self, scope: Scope, slug: &str, except: Option<Uuid>) -> bool {
        self.groups
            .values()
            .any(|g| g.scope == scope && g.slug == slug && Some(g.id) != except)
    }

    fn permission_slug_taken(&self, scope: Scope, slug: &str, except: Option<Uuid>) -> bool {
        self.permissions
            .values()
            .any(|p| p.scope == scope && p.slug == slug && Some(p.id) != except)
    }

    fn site_role_slug_taken(&self, slug: &str, except: Option<Uuid>) -> bool {
        self.site_roles
            .values()
            .any(|r| r.slug == slug && Some(r.id) != except)
    }

    fn guild_role_slug_taken(&self, guild_id: Uuid, slug: &str, except: Option<Uuid>) -> bool {
        self.guild_roles
            .values()
            .any(|r| r.guild_id == guild_id && r.slug == slug && Some(r.id) != except)
    }

    /// Permissions referenced by a join set, catalog-ordered.
    fn permissions_in(&self, ids: Option<&HashSet<Uuid>>) -> Vec<Permission> {
        let mut permissions: Vec<Permission> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.permissions.get(id).cloned())
            .collect();
        sort_catalog(&mut permissions);
        permissions
    }

    fn slugs_in(&self, ids: Option<&HashSet<Uuid>>) -> Vec<String> {
        self.permissions_in(ids)
            .into_iter()
            .map(|p| p.slug)
            .collect()
    }

    /// Like [`Self::slugs_in`], restricted to Guild-scope permissions.
    fn guild_slugs_in(&self, ids: Option<&HashSet<Uuid>>) -> Vec<String> {
        self.permissions_in(ids)
            .into_iter()
            .filter(|p| p.scope == Scope::Guild)
            .map(|p| p.slug)
            .collect()
    }
}

fn sort_catalog(permissions: &mut [Permission]) {
    permissions.sort_by(|a, b| {
        a.group_id
            .cmp(&b.group_id)
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn priority_overflow() -> AccessError {
    AccessError::Validation("Guild role priority out of range".to_string())
}

fn duplicate(entity: &str) -> AccessError {
    AccessError::Validation(format!("{entity} slug already taken"))
}

/// Thread-safe in-memory store. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryAccessStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user identity.
    pub async fn insert_user(&self, username: &str) -> User {
        let user = User {
            id: Uuid::now_v7(),
            username: username.to_string(),
            created_at: Utc::now(),
        };
        self.state
            .write()
            .await
            .users
            .insert(user.id, user.clone());
        user
    }

    /// Register a character owned by `user_id`.
    pub async fn insert_character(&self, user_id: Uuid, name: &str) -> AccessResult<Character> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(AccessError::NotFound("User"));
        }
        let character = Character {
            id: Uuid::now_v7(),
            user_id,
            name: name.to_string(),
        };
        state.characters.insert(character.id, character.clone());
        Ok(character)
    }

    /// Register a guild.
    pub async fn insert_guild(
        &self,
        name: &str,
        owner_id: Uuid,
        leader_character_id: Option<Uuid>,
    ) -> AccessResult<Guild> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&owner_id) {
            return Err(AccessError::NotFound("User"));
        }
        if let Some(character_id) = leader_character_id {
            if !state.characters.contains_key(&character_id) {
                return Err(AccessError::NotFound("Character"));
            }
        }
        let guild = Guild {
            id: Uuid::now_v7(),
            name: name.to_string(),
            owner_id,
            leader_character_id,
        };
        state.guilds.insert(guild.id, guild.clone());
        Ok(guild)
    }

    /// Point the guild's leader at another character (or none).
    pub async fn set_guild_leader(
        &self,
        guild_id: Uuid,
        leader_character_id: Option<Uuid>,
    ) -> AccessResult<Guild> {
        let mut state = self.state.write().await;
        if let Some(character_id) = leader_character_id {
            if !state.characters.contains_key(&character_id) {
                return Err(AccessError::NotFound("Character"));
            }
        }
        let guild = state
            .guilds
            .get_mut(&guild_id)
            .ok_or(AccessError::NotFound("Guild"))?;
        guild.leader_character_id = leader_character_id;
        Ok(guild.clone())
    }
}

#[async_trait]
impl UserDirectory for MemoryAccessStore {
    async fn find_user(&self, user_id: Uuid) -> AccessResult<Option<User>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn characters_of_user(&self, user_id: Uuid) -> AccessResult<Vec<Character>> {
        let state = self.state.read().await;
        let mut characters: Vec<Character> = state
            .characters
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        characters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(characters)
    }
}

#[async_trait]
impl GuildDirectory for MemoryAccessStore {
    async fn find_guild(&self, guild_id: Uuid) -> AccessResult<Option<Guild>> {
        Ok(self.state.read().await.guilds.get(&guild_id).cloned())
    }
}

#[async_trait]
impl CharacterDirectory for MemoryAccessStore {
    async fn find_character(&self, character_id: Uuid) -> AccessResult<Option<Character>> {
        Ok(self.state.read().await.characters.get(&character_id).cloned())
    }

    async fn membership_of(&self, character_id: Uuid) -> AccessResult<Option<GuildMember>> {
        Ok(self
            .state
            .read()
            .await
            .members
            .values()
            .find(|m| m.character_id == character_id)
            .cloned())
    }
}

#[async_trait]
impl AccessStore for MemoryAccessStore {
    // --- Catalog ---

    async fn insert_group(&self, draft: GroupDraft) -> AccessResult<PermissionGroup> {
        let mut state = self.state.write().await;
        if state.group_slug_taken(draft.scope, &draft.slug, None) {
            return Err(duplicate("Permission group"));
        }
        let now = Utc::now();
        let group = PermissionGroup {
            id: Uuid::now_v7(),
            name: draft.name,
            slug: draft.slug,
            scope: draft.scope,
            created_at: now,
            updated_at: now,
        };
        state.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn find_group(&self, group_id: Uuid) -> AccessResult<Option<PermissionGroup>> {
        Ok(self.state.read().await.groups.get(&group_id).cloned())
    }

    async fn find_group_by_slug(
        &self,
        scope: Scope,
        slug: &str,
    ) -> AccessResult<Option<PermissionGroup>> {
        Ok(self
            .state
            .read()
            .await
            .groups
            .values()
            .find(|g| g.scope == scope && g.slug == slug)
            .cloned())
    }

    async fn update_group(
        &self,
        group_id: Uuid,
        patch: GroupPatch,
    ) -> AccessResult<Option<PermissionGroup>> {
        let mut state = self.state.write().await;
        let Some(current) = state.groups.get(&group_id).cloned() else {
            return Ok(None);
        };
        let scope = patch.scope.unwrap_or(current.scope);
        let slug = patch.slug.unwrap_or(current.slug);
        if state.group_slug_taken(scope, &slug, Some(group_id)) {
            return Err(duplicate("Permission group"));
        }
        let group = PermissionGroup {
            name: patch.name.unwrap_or(current.name),
            slug,
            scope,
            updated_at: Utc::now(),
            ..current
        };
        state.groups.insert(group_id, group.clone());
        Ok(Some(group))
    }

    async fn delete_group(&self, group_id: Uuid) -> AccessResult<GroupDeletion> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(&group_id) {
            return Ok(GroupDeletion::Missing);
        }
        if state.permissions.values().any(|p| p.group_id == group_id) {
            return Ok(GroupDeletion::HasPermissions);
        }
        state.groups.remove(&group_id);
        Ok(GroupDeletion::Deleted)
    }

    async fn insert_permission(&self, draft: PermissionDraft) -> AccessResult<Permission> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(&draft.group_id) {
            return Err(AccessError::NotFound("Permission group"));
        }
        if state.permission_slug_taken(draft.scope, &draft.slug, None) {
            return Err(duplicate("Permission"));
        }
        let now = Utc::now();
        let permission = Permission {
            id: Uuid::now_v7(),
            name: draft.name,
            slug: draft.slug,
            scope: draft.scope,
            description: draft.description,
            group_id: draft.group_id,
            created_at: now,
            updated_at: now,
        };
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_permission(&self, permission_id: Uuid) -> AccessResult<Option<Permission>> {
        Ok(self.state.read().await.permissions.get(&permission_id).cloned())
    }

    async fn find_permission_by_slug(
        &self,
        scope: Scope,
        slug: &str,
    ) -> AccessResult<Option<Permission>> {
        Ok(self
            .state
            .read()
            .await
            .permissions
            .values()
            .find(|p| p.scope == scope && p.slug == slug)
            .cloned())
    }

    async fn find_permissions(&self, ids: &[Uuid]) -> AccessResult<Vec<Permission>> {
        let state = self.state.read().await;
        let wanted: HashSet<Uuid> = ids.iter().copied().collect();
        let mut permissions: Vec<Permission> = wanted
            .iter()
            .filter_map(|id| state.permissions.get(id).cloned())
            .collect();
        sort_catalog(&mut permissions);
        Ok(permissions)
    }

    async fn update_permission(
        &self,
        permission_id: Uuid,
        patch: PermissionPatch,
    ) -> AccessResult<Option<Permission>> {
        let mut state = self.state.write().await;
        let Some(current) = state.permissions.get(&permission_id).cloned() else {
            return Ok(None);
        };
        let (group_id, scope) = patch.regroup.unwrap_or((current.group_id, current.scope));
        if !state.groups.contains_key(&group_id) {
            return Err(AccessError::NotFound("Permission group"));
        }
        let slug = patch.slug.unwrap_or(current.slug);
        if state.permission_slug_taken(scope, &slug, Some(permission_id)) {
            return Err(duplicate("Permission"));
        }
        let permission = Permission {
            name: patch.name.unwrap_or(current.name),
            slug,
            scope,
            description: patch.description.or(current.description),
            group_id,
            updated_at: Utc::now(),
            ..current
        };
        if scope == Scope::Site {
            for set in state.guild_role_permission.values_mut() {
                set.remove(&permission_id);
            }
        }
        state.permissions.insert(permission_id, permission.clone());
        Ok(Some(permission))
    }

    async fn delete_permission(&self, permission_id: Uuid) -> AccessResult<bool> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.permissions.remove(&permission_id).is_none() {
            return Ok(false);
        }
        for set in state
            .role_permission
            .values_mut()
            .chain(state.user_permission.values_mut())
            .chain(state.guild_role_permission.values_mut())
        {
            set.remove(&permission_id);
        }
        Ok(true)
    }

    async fn list_permissions(&self, scope: Option<Scope>) -> AccessResult<Vec<Permission>> {
        let state = self.state.read().await;
        let mut permissions: Vec<Permission> = state
            .permissions
            .values()
            .filter(|p| scope.is_none_or(|s| p.scope == s))
            .cloned()
            .collect();
        sort_catalog(&mut permissions);
        Ok(permissions)
    }

    // --- Site roles ---

    async fn insert_site_role(
        &self,
        draft: SiteRoleDraft,
        permission_ids: &[Uuid],
    ) -> AccessResult<SiteRole> {
        let mut state = self.state.write().await;
        state.require_permissions(permission_ids)?;
        if state.site_role_slug_taken(&draft.slug, None) {
            return Err(duplicate("Site role"));
        }
        let now = Utc::now();
        let role = SiteRole {
            id: Uuid::now_v7(),
            name: draft.name,
            slug: draft.slug,
            description: draft.description,
            created_at: now,
            updated_at: now,
        };
        state.site_roles.insert(role.id, role.clone());
        state
            .role_permission
            .insert(role.id, permission_ids.iter().copied().collect());
        Ok(role)
    }

    async fn find_site_role(&self, role_id: Uuid) -> AccessResult<Option<SiteRole>> {
        Ok(self.state.read().await.site_roles.get(&role_id).cloned())
    }

    async fn find_site_roles(&self, ids: &[Uuid]) -> AccessResult<Vec<SiteRole>> {
        let state = self.state.read().await;
        let wanted: HashSet<Uuid> = ids.iter().copied().collect();
        let mut roles: Vec<SiteRole> = wanted
            .iter()
            .filter_map(|id| state.site_roles.get(id).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn update_site_role(
        &self,
        role_id: Uuid,
        patch: SiteRolePatch,
        permission_ids: Option<&[Uuid]>,
    ) -> AccessResult<Option<SiteRole>> {
        let mut state = self.state.write().await;
        let Some(current) = state.site_roles.get(&role_id).cloned() else {
            return Ok(None);
        };
        if let Some(ids) = permission_ids {
            state.require_permissions(ids)?;
        }
        let slug = patch.slug.unwrap_or(current.slug);
        if state.site_role_slug_taken(&slug, Some(role_id)) {
            return Err(duplicate("Site role"));
        }

        if let Some(ids) = permission_ids {
            let attached = state.role_permission.entry(role_id).or_default();
            let current_ids: Vec<Uuid> = attached.iter().copied().collect();
            SyncPlan::compute(&current_ids, ids).apply_to(attached);
        }

        let role = SiteRole {
            name: patch.name.unwrap_or(current.name),
            slug,
            description: patch.description.or(current.description),
            updated_at: Utc::now(),
            ..current
        };
        state.site_roles.insert(role_id, role.clone());
        Ok(Some(role))
    }

    async fn delete_site_role(&self, role_id: Uuid) -> AccessResult<bool> {
        let mut state = self.state.write().await;
        if state.site_roles.remove(&role_id).is_none() {
            return Ok(false);
        }
        state.role_permission.remove(&role_id);
        for roles in state.user_role.values_mut() {
            roles.remove(&role_id);
        }
        Ok(true)
    }

    async fn site_role_permissions(&self, role_id: Uuid) -> AccessResult<Vec<Permission>> {
        let state = self.state.read().await;
        Ok(state.permissions_in(state.role_permission.get(&role_id)))
    }

    // --- Guild roles ---

    async fn insert_guild_role(&self, draft: GuildRoleDraft) -> AccessResult<GuildRole> {
        let mut state = self.state.write().await;
        if !state.guilds.contains_key(&draft.guild_id) {
            return Err(AccessError::NotFound("Guild"));
        }
        if state.guild_role_slug_taken(draft.guild_id, &draft.slug, None) {
            return Err(duplicate("Guild role"));
        }
        let priority = match draft.priority {
            Some(priority) => priority,
            None => state
                .guild_roles
                .values()
                .filter(|r| r.guild_id == draft.guild_id)
                .map(|r| r.priority)
                .max()
                .map_or(Some(0), |max| max.checked_add(1))
                .ok_or_else(priority_overflow)?,
        };
        let now = Utc::now();
        let role = GuildRole {
            id: Uuid::now_v7(),
            guild_id: draft.guild_id,
            name: draft.name,
            slug: draft.slug,
            priority,
            created_at: now,
            updated_at: now,
        };
        state.guild_roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn find_guild_role(&self, role_id: Uuid) -> AccessResult<Option<GuildRole>> {
        Ok(self.state.read().await.guild_roles.get(&role_id).cloned())
    }

    async fn find_guild_role_by_slug(
        &self,
        guild_id: Uuid,
        slug: &str,
    ) -> AccessResult<Option<GuildRole>> {
        Ok(self
            .state
            .read()
            .await
            .guild_roles
            .values()
            .find(|r| r.guild_id == guild_id && r.slug == slug)
            .cloned())
    }

    async fn update_guild_role(
        &self,
        role_id: Uuid,
        patch: GuildRolePatch,
    ) -> AccessResult<Option<GuildRole>> {
        let mut state = self.state.write().await;
        let Some(current) = state.guild_roles.get(&role_id).cloned() else {
            return Ok(None);
        };
        let slug = patch.slug.unwrap_or(current.slug);
        if state.guild_role_slug_taken(current.guild_id, &slug, Some(role_id)) {
            return Err(duplicate("Guild role"));
        }
        let role = GuildRole {
            name: patch.name.unwrap_or(current.name),
            slug,
            priority: patch.priority.unwrap_or(current.priority),
            updated_at: Utc::now(),
            ..current
        };
        state.guild_roles.insert(role_id, role.clone());
        Ok(Some(role))
    }

    async fn delete_guild_role(&self, role_id: Uuid) -> AccessResult<bool> {
        let mut state = self.state.write().await;
        match state.guild_roles.get(&role_id) {
            Some(role) if !is_protected_slug(&role.slug) => {}
            _ => return Ok(false),
        }
        state.guild_roles.remove(&role_id);
        state.guild_role_permission.remove(&role_id);
        for member in state.members.values_mut() {
            if member.guild_role_id == Some(role_id) {
                member.guild_role_id = None;
            }
        }
        Ok(true)
    }

    async fn list_guild_roles(&self, guild_id: Uuid) -> AccessResult<Vec<GuildRole>> {
        let state = self.state.read().await;
        let mut roles: Vec<GuildRole> = state
            .guild_roles
            .values()
            .filter(|r| r.guild_id == guild_id)
            .cloned()
            .collect();
        roles.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(roles)
    }

    async fn replace_guild_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> AccessResult<SyncPlan> {
        let mut state = self.state.write().await;
        if !state.guild_roles.contains_key(&role_id) {
            return Err(AccessError::NotFound("Guild role"));
        }
        state.require_permissions(permission_ids)?;

        let attached = state.guild_role_permission.entry(role_id).or_default();
        let current_ids: Vec<Uuid> = attached.iter().copied().collect();
        let plan = SyncPlan::compute(&current_ids, permission_ids);
        plan.apply_to(attached);
        Ok(plan)
    }

    async fn guild_role_permissions(&self, role_id: Uuid) -> AccessResult<Vec<Permission>> {
        let state = self.state.read().await;
        Ok(state.permissions_in(state.guild_role_permission.get(&role_id)))
    }

    // --- Membership index ---

    async fn insert_member(
        &self,
        guild_id: Uuid,
        character_id: Uuid,
        role_id: Option<Uuid>,
    ) -> AccessResult<GuildMember> {
        let mut state = self.state.write().await;
        if !state.guilds.contains_key(&guild_id) {
            return Err(AccessError::NotFound("Guild"));
        }
        if !state.characters.contains_key(&character_id) {
            return Err(AccessError::NotFound("Character"));
        }
        if let Some(role_id) = role_id {
            if !state.guild_roles.contains_key(&role_id) {
                return Err(AccessError::NotFound("Guild role"));
            }
        }
        if state.members.values().any(|m| m.character_id == character_id) {
            return Err(AccessError::Validation(
                "Character already belongs to a guild".to_string(),
            ));
        }
        let member = GuildMember {
            id: Uuid::now_v7(),
            guild_id,
            character_id,
            guild_role_id: role_id,
            joined_at: Utc::now(),
        };
        state.members.insert(member.id, member.clone());
        Ok(member)
    }

    async fn find_member(&self, member_id: Uuid) -> AccessResult<Option<GuildMember>> {
        Ok(self.state.read().await.members.get(&member_id).cloned())
    }

    async fn set_member_role(
        &self,
        member_id: Uuid,
        role_id: Option<Uuid>,
    ) -> AccessResult<Option<GuildMember>> {
        let mut state = self.state.write().await;
        if let Some(role_id) = role_id {
            if !state.guild_roles.contains_key(&role_id) {
                return Err(AccessError::NotFound("Guild role"));
            }
        }
        let Some(member) = state.members.get_mut(&member_id) else {
            return Ok(None);
        };
        member.guild_role_id = role_id;
        Ok(Some(member.clone()))
    }

    async fn delete_member(&self, member_id: Uuid) -> AccessResult<bool> {
        Ok(self
            .state
            .write()
            .await
            .members
            .remove(&member_id)
            .is_some())
    }

    async fn list_members(&self, guild_id: Uuid) -> AccessResult<Vec<GuildMember>> {
        let state = self.state.read().await;
        let mut members: Vec<GuildMember> = state
            .members
            .values()
            .filter(|m| m.guild_id == guild_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        Ok(members)
    }

    // --- Users ---

    async fn replace_user_access(
        &self,
        user_id: Uuid,
        role_ids: Option<&[Uuid]>,
        permission_ids: Option<&[Uuid]>,
    ) -> AccessResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(AccessError::NotFound("User"));
        }
        if let Some(ids) = role_ids {
            if !ids.iter().all(|id| state.site_roles.contains_key(id)) {
                return Err(AccessError::NotFound("Site role"));
            }
        }
        if let Some(ids) = permission_ids {
            state.require_permissions(ids)?;
        }

        if let Some(ids) = role_ids {
            let held = state.user_role.entry(user_id).or_default();
            let current: Vec<Uuid> = held.iter().copied().collect();
            SyncPlan::compute(&current, ids).apply_to(held);
        }
        if let Some(ids) = permission_ids {
            let held = state.user_permission.entry(user_id).or_default();
            let current: Vec<Uuid> = held.iter().copied().collect();
            SyncPlan::compute(&current, ids).apply_to(held);
        }
        Ok(())
    }

    async fn user_roles(&self, user_id: Uuid) -> AccessResult<Vec<SiteRole>> {
        let state = self.state.read().await;
        let mut roles: Vec<SiteRole> = state
            .user_role
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.site_roles.get(id).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn user_permissions(&self, user_id: Uuid) -> AccessResult<Vec<Permission>> {
        let state = self.state.read().await;
        Ok(state.permissions_in(state.user_permission.get(&user_id)))
    }

    // --- Snapshots ---

    async fn load_site_grants(&self, user_id: Uuid) -> AccessResult<SiteGrants> {
        let state = self.state.read().await;
        let mut roles: Vec<SiteRoleGrant> = state
            .user_role
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.site_roles.get(id))
            .map(|role| SiteRoleGrant {
                role_id: role.id,
                slug: role.slug.clone(),
                permission_slugs: state.slugs_in(state.role_permission.get(&role.id)),
            })
            .collect();
        roles.sort_by(|a, b| a.slug.cmp(&b.slug));

        Ok(SiteGrants {
            user_id,
            roles,
            direct_slugs: state.slugs_in(state.user_permission.get(&user_id)),
        })
    }

    async fn load_guild_grants(
        &self,
        user_id: Uuid,
        guild_id: Uuid,
    ) -> AccessResult<Option<GuildGrants>> {
        let state = self.state.read().await;
        let Some(guild) = state.guilds.get(&guild_id) else {
            return Ok(None);
        };

        let leader_user_id = guild
            .leader_character_id
            .and_then(|id| state.characters.get(&id))
            .map(|c| c.user_id);

        let mut guild_catalog: Vec<String> = state
            .permissions
            .values()
            .filter(|p| p.scope == Scope::Guild)
            .map(|p| p.slug.clone())
            .collect();
        guild_catalog.sort();

        let mut memberships: Vec<MembershipGrant> = state
            .members
            .values()
            .filter(|m| m.guild_id == guild_id)
            .filter_map(|m| {
                let owner = state.characters.get(&m.character_id)?.user_id;
                (owner == user_id).then(|| MembershipGrant {
                    member_id: m.id,
                    character_id: m.character_id,
                    owner_user_id: owner,
                    role: m
                        .guild_role_id
                        .and_then(|id| state.guild_roles.get(&id))
                        .map(|role| GuildRoleGrant {
                            role_id: role.id,
                            slug: role.slug.clone(),
                            permission_slugs: state
                                .guild_slugs_in(state.guild_role_permission.get(&role.id)),
                        }),
                })
            })
            .collect();
        memberships.sort_by(|a, b| a.member_id.cmp(&b.member_id));

        Ok(Some(GuildGrants {
            guild_id,
            leader_user_id,
            guild_catalog,
            memberships,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn guild_fixture(store: &MemoryAccessStore) -> (User, Character, Guild) {
        let user = store.insert_user("aria").await;
        let character = store.insert_character(user.id, "Aria").await.unwrap();
        let guild = store
            .insert_guild("Night Watch", user.id, Some(character.id))
            .await
            .unwrap();
        (user, character, guild)
    }

    fn group_draft(slug: &str, scope: Scope) -> GroupDraft {
        GroupDraft {
            name: slug.to_string(),
            slug: slug.to_string(),
            scope,
        }
    }

    fn permission_draft(slug: &str, group: &PermissionGroup) -> PermissionDraft {
        PermissionDraft {
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
            group_id: group.id,
            scope: group.scope,
        }
    }

    #[tokio::test]
    async fn test_group_slug_unique_per_scope() {
        let store = MemoryAccessStore::new();
        store
            .insert_group(group_draft("admin", Scope::Site))
            .await
            .unwrap();
        store
            .insert_group(group_draft("admin", Scope::Guild))
            .await
            .unwrap();

        let duplicate = store.insert_group(group_draft("admin", Scope::Site)).await;
        assert!(matches!(duplicate, Err(AccessError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_group_guarded_by_permissions() {
        let store = MemoryAccessStore::new();
        let group = store
            .insert_group(group_draft("roster", Scope::Guild))
            .await
            .unwrap();
        let permission = store
            .insert_permission(permission_draft("view-roster", &group))
            .await
            .unwrap();

        assert_eq!(
            store.delete_group(group.id).await.unwrap(),
            GroupDeletion::HasPermissions
        );
        assert!(store.delete_permission(permission.id).await.unwrap());
        assert_eq!(
            store.delete_group(group.id).await.unwrap(),
            GroupDeletion::Deleted
        );
        assert_eq!(
            store.delete_group(group.id).await.unwrap(),
            GroupDeletion::Missing
        );
    }

    #[tokio::test]
    async fn test_delete_permission_cascades_attachments() {
        let store = MemoryAccessStore::new();
        let (user, _, guild) = guild_fixture(&store).await;
        let group = store
            .insert_group(group_draft("roster", Scope::Guild))
            .await
            .unwrap();
        let permission = store
            .insert_permission(permission_draft("view-roster", &group))
            .await
            .unwrap();
        let role = store
            .insert_guild_role(GuildRoleDraft {
                guild_id: guild.id,
                name: "Member".into(),
                slug: "member".into(),
                priority: None,
            })
            .await
            .unwrap();
        store
            .replace_guild_role_permissions(role.id, &[permission.id])
            .await
            .unwrap();
        store
            .replace_user_access(user.id, None, Some(&[permission.id]))
            .await
            .unwrap();

        store.delete_permission(permission.id).await.unwrap();

        assert!(store.guild_role_permissions(role.id).await.unwrap().is_empty());
        assert!(store.user_permissions(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guild_role_priority_defaults() {
        let store = MemoryAccessStore::new();
        let (_, _, guild) = guild_fixture(&store).await;
        let draft = |slug: &str, priority| GuildRoleDraft {
            guild_id: guild.id,
            name: slug.to_string(),
            slug: slug.to_string(),
            priority,
        };

        let first = store.insert_guild_role(draft("first", None)).await.unwrap();
        assert_eq!(first.priority, 0);

        store.insert_guild_role(draft("officer", Some(5))).await.unwrap();
        let next = store.insert_guild_role(draft("next", None)).await.unwrap();
        assert_eq!(next.priority, 6);
    }

    #[tokio::test]
    async fn test_delete_guild_role_clears_member_role() {
        let store = MemoryAccessStore::new();
        let (_, character, guild) = guild_fixture(&store).await;
        let role = store
            .insert_guild_role(GuildRoleDraft {
                guild_id: guild.id,
                name: "Officer".into(),
                slug: "officer".into(),
                priority: Some(5),
            })
            .await
            .unwrap();
        let member = store
            .insert_member(guild.id, character.id, Some(role.id))
            .await
            .unwrap();

        assert!(store.delete_guild_role(role.id).await.unwrap());

        let member = store.find_member(member.id).await.unwrap().unwrap();
        assert_eq!(member.guild_role_id, None);
    }

    #[tokio::test]
    async fn test_store_refuses_protected_role_deletion() {
        let store = MemoryAccessStore::new();
        let (_, _, guild) = guild_fixture(&store).await;
        let leader = store
            .insert_guild_role(GuildRoleDraft {
                guild_id: guild.id,
                name: "Leader".into(),
                slug: "leader".into(),
                priority: Some(100),
            })
            .await
            .unwrap();

        assert!(!store.delete_guild_role(leader.id).await.unwrap());
        assert!(store.find_guild_role(leader.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_character_has_one_membership() {
        let store = MemoryAccessStore::new();
        let (user, character, guild) = guild_fixture(&store).await;
        let other_guild = store.insert_guild("Dawn", user.id, None).await.unwrap();

        store.insert_member(guild.id, character.id, None).await.unwrap();
        let second = store.insert_member(other_guild.id, character.id, None).await;

        assert!(matches!(second, Err(AccessError::Validation(_))));
        let membership = store.membership_of(character.id).await.unwrap().unwrap();
        assert_eq!(membership.guild_id, guild.id);
    }

    #[tokio::test]
    async fn test_replace_user_access_rejects_unknown_ids_without_mutation() {
        let store = MemoryAccessStore::new();
        let user = store.insert_user("brin").await;
        let group = store
            .insert_group(group_draft("site-admin", Scope::Site))
            .await
            .unwrap();
        let permission = store
            .insert_permission(permission_draft("ban-user", &group))
            .await
            .unwrap();

        let result = store
            .replace_user_access(user.id, Some(&[Uuid::now_v7()]), Some(&[permission.id]))
            .await;

        assert!(matches!(result, Err(AccessError::NotFound("Site role"))));
        assert!(store.user_permissions(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_guild_grants_filters_to_user() {
        let store = MemoryAccessStore::new();
        let (leader, _, guild) = guild_fixture(&store).await;
        let other = store.insert_user("cato").await;
        let other_character = store.insert_character(other.id, "Cato").await.unwrap();
        store
            .insert_member(guild.id, other_character.id, None)
            .await
            .unwrap();

        let grants = store
            .load_guild_grants(leader.id, guild.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grants.leader_user_id, Some(leader.id));
        assert!(grants.memberships.is_empty());

        let grants = store
            .load_guild_grants(other.id, guild.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grants.memberships.len(), 1);
        assert_eq!(grants.memberships[0].owner_user_id, other.id);

        assert!(store
            .load_guild_grants(other.id, Uuid::now_v7())
            .await
            .unwrap()
            .is_none());
    }
}
