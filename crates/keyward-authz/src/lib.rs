//! Keyward authorization primitives shared by the permissions service and its clients.
//!
//! # Purpose
//! Centralizes the static permission schema, the permission data model, and the
//! request/response shapes carried over the message bus.
//!
//! # How it fits
//! The permissions service validates writes against [`schema`], persists and
//! caches [`PermissionSet`] values, and speaks the [`wire`] protocol. Clients
//! use the same [`wire`] types so both ends agree on one error taxonomy.
//!
//! # Key invariants
//! - Module and action identifiers are case-insensitive and stored lower-case.
//! - A module is upper-cased only when a [`Permission`] is serialized for the wire.
//! - The schema is a fixed enumeration; there are no wildcards or role rules.
//!
//! # Examples
//! ```rust
//! use keyward_authz::{Permission, PermissionSet, schema};
//!
//! assert!(schema::is_valid("TRADES", "create"));
//! assert!(!schema::is_valid("TRADES", "delete"));
//!
//! let mut set = PermissionSet::new();
//! set.insert("trades", "CREATE");
//! assert!(set.contains("TRADES", "create"));
//! assert_eq!(set.to_vec(), vec![Permission::new("Trades", "create")]);
//! ```

mod errors;
mod module;
mod permission;
pub mod schema;
pub mod wire;

pub use errors::{AuthzError, AuthzResult};
pub use module::Module;
pub use permission::{ActionMap, Permission, PermissionSet, canonical_case, display_case};
pub use wire::{ErrorBody, ErrorCode, Reply, WireError};
