//! Warband Server
//!
//! Permission and role engine for guild-based game communities: a site-wide
//! permission catalog with roles, per-guild roles, and the resolver and
//! guard that decide what a user may do.

pub mod config;
pub mod db;
pub mod permissions;
pub mod util;
