//! Reusable test helpers for integration tests.
//!
//! ## Shared Resources
//!
//! Use [`shared_pool()`] to avoid creating a new pool per test.
//!
//! ## Cleanup Guards
//!
//! Use [`CleanupGuard`] for RAII-based cleanup that runs even if a test panics.
//!
//! ## Fixtures
//!
//! [`player()`] and [`guild_led_by()`] build users, characters and guilds on
//! the in-memory store; the `create_*` functions do the same against
//! `PostgreSQL`.
#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;

use sqlx::PgPool;
use tokio::sync::OnceCell;
use uuid::Uuid;
use warband_server::config::Config;
use warband_server::db;
use warband_server::permissions::catalog::{create_group, create_permission};
use warband_server::permissions::{
    AccessStore, Character, Guild, MemoryAccessStore, NewPermission, NewPermissionGroup,
    Permission, PermissionGroup, Scope, User,
};

// ============================================================================
// Shared resources
// ============================================================================

/// Shared database pool across all tests in the same binary.
static SHARED_POOL: OnceCell<PgPool> = OnceCell::const_new();

/// Get or create a shared database pool with migrations applied.
pub async fn shared_pool() -> &'static PgPool {
    SHARED_POOL
        .get_or_init(|| async {
            let config = Config::default_for_test();
            let pool = db::create_pool(&config)
                .await
                .expect("Failed to connect to test DB");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run migrations");
            pool
        })
        .await
}

/// Short random suffix for names that must be unique across parallel tests.
pub fn unique(prefix: &str) -> String {
    let id = Uuid::now_v7().simple().to_string();
    format!("{prefix}-{}", &id[20..])
}

// ============================================================================
// Cleanup
// ============================================================================

type CleanupAction = Box<dyn FnOnce(PgPool) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Runs registered cleanup actions on drop, in registration order.
///
/// ```ignore
/// let mut guard = CleanupGuard::new(pool.clone());
/// guard.delete_guild(guild_id);
/// guard.delete_user(user_id);
/// ```
pub struct CleanupGuard {
    pool: PgPool,
    actions: Vec<CleanupAction>,
}

impl CleanupGuard {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            actions: Vec::new(),
        }
    }

    /// Register a generic async cleanup action.
    pub fn add<F, Fut>(&mut self, action: F)
    where
        F: FnOnce(PgPool) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.actions
            .push(Box::new(move |pool| Box::pin(action(pool))));
    }

    /// Delete a user; characters and access rows cascade.
    pub fn delete_user(&mut self, user_id: Uuid) {
        self.add(move |pool| async move {
            let _ = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(user_id)
                .execute(&pool)
                .await;
        });
    }

    /// Delete a guild; roles and memberships cascade.
    pub fn delete_guild(&mut self, guild_id: Uuid) {
        self.add(move |pool| async move {
            let _ = sqlx::query("DELETE FROM guilds WHERE id = $1")
                .bind(guild_id)
                .execute(&pool)
                .await;
        });
    }

    /// Delete a permission group together with its permissions.
    pub fn delete_group(&mut self, group_id: Uuid) {
        self.add(move |pool| async move {
            let _ = sqlx::query("DELETE FROM permissions WHERE group_id = $1")
                .bind(group_id)
                .execute(&pool)
                .await;
            let _ = sqlx::query("DELETE FROM permission_groups WHERE id = $1")
                .bind(group_id)
                .execute(&pool)
                .await;
        });
    }

    pub fn delete_site_role(&mut self, role_id: Uuid) {
        self.add(move |pool| async move {
            let _ = sqlx::query("DELETE FROM roles WHERE id = $1")
                .bind(role_id)
                .execute(&pool)
                .await;
        });
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let actions = std::mem::take(&mut self.actions);
        if actions.is_empty() {
            return;
        }

        let pool = self.pool.clone();
        let handle = tokio::runtime::Handle::current();

        // Spawn a blocking thread to run async cleanup.
        // This works regardless of tokio runtime flavor.
        std::thread::spawn(move || {
            handle.block_on(async move {
                for action in actions {
                    action(pool.clone()).await;
                }
            });
        })
        .join()
        .expect("Cleanup thread panicked");
    }
}

// ============================================================================
// PostgreSQL fixtures
// ============================================================================

pub async fn create_user(pool: &PgPool) -> Uuid {
    let user_id = Uuid::now_v7();
    sqlx::query("INSERT INTO users (id, username) VALUES ($1, $2)")
        .bind(user_id)
        .bind(unique("user"))
        .execute(pool)
        .await
        .expect("Failed to create user");
    user_id
}

pub async fn create_character(pool: &PgPool, user_id: Uuid) -> Uuid {
    let character_id = Uuid::now_v7();
    sqlx::query("INSERT INTO characters (id, user_id, name) VALUES ($1, $2, $3)")
        .bind(character_id)
        .bind(user_id)
        .bind(unique("char"))
        .execute(pool)
        .await
        .expect("Failed to create character");
    character_id
}

pub async fn create_guild(pool: &PgPool, owner_id: Uuid, leader_character_id: Option<Uuid>) -> Uuid {
    let guild_id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO guilds (id, name, owner_id, leader_character_id) VALUES ($1, $2, $3, $4)",
    )
    .bind(guild_id)
    .bind(unique("guild"))
    .bind(owner_id)
    .bind(leader_character_id)
    .execute(pool)
    .await
    .expect("Failed to create guild");
    guild_id
}

// ============================================================================
// In-memory fixtures
// ============================================================================

/// A user with one character.
pub struct Player {
    pub user: User,
    pub character: Character,
}

pub async fn player(store: &MemoryAccessStore, name: &str) -> Player {
    let user = store.insert_user(name).await;
    let character = store
        .insert_character(user.id, name)
        .await
        .expect("Failed to create character");
    Player { user, character }
}

/// A guild whose leader character belongs to the returned player.
pub async fn guild_led_by(store: &MemoryAccessStore, name: &str) -> (Guild, Player) {
    let leader = player(store, &format!("{name}-leader")).await;
    let guild = store
        .insert_guild(name, leader.user.id, Some(leader.character.id))
        .await
        .expect("Failed to create guild");
    (guild, leader)
}

/// Find or create the group for `scope`, then add a permission to it.
pub async fn permission<S: AccessStore + ?Sized>(store: &S, slug: &str, scope: Scope) -> Permission {
    let group = group_for(store, scope).await;
    create_permission(
        store,
        NewPermission {
            name: slug.to_string(),
            slug: Some(slug.to_string()),
            description: None,
            group_id: group.id,
        },
    )
    .await
    .expect("Failed to create permission")
}

pub async fn group_for<S: AccessStore + ?Sized>(store: &S, scope: Scope) -> PermissionGroup {
    let slug = format!("fixtures-{}", scope.as_str());
    if let Some(group) = store
        .find_group_by_slug(scope, &slug)
        .await
        .expect("Failed to look up group")
    {
        return group;
    }
    create_group(
        store,
        NewPermissionGroup {
            name: slug.clone(),
            slug: Some(slug),
            scope,
        },
    )
    .await
    .expect("Failed to create group")
}
