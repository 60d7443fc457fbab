//! Scoped permission engine.
//!
//! Two permission namespaces share one mechanism:
//! - Site permissions: granted through site roles or directly to a user
//! - Guild permissions: granted through per-guild roles held by a user's
//!   characters, or wholesale to whoever controls the guild leader
//!
//! Storage sits behind [`AccessStore`]; [`PgAccessStore`] backs production
//! and [`MemoryAccessStore`] backs tests and embedding.

pub mod catalog;
pub mod commands;
pub mod error;
pub mod guard;
pub mod guild_roles;
pub mod helpers;
pub mod membership;
pub mod memory;
pub mod models;
pub mod queries;
pub mod resolver;
pub mod site_roles;
pub mod store;
pub mod sync;
pub mod well_known;

pub use commands::{
    resolve_guild_permission_slugs, resolve_site_permission_slugs,
    update_user_roles_and_permissions,
};
pub use error::{AccessError, AccessResult, BusinessRule};
pub use guard::AttemptedFields;
pub use helpers::{GuildPermissionContext, SitePermissionContext};
pub use memory::MemoryAccessStore;
pub use models::*;
pub use queries::PgAccessStore;
pub use resolver::GuildResolution;
pub use store::{AccessStore, CharacterDirectory, GuildDirectory, UserDirectory};
pub use well_known::{GuildPermission, SitePermission};
