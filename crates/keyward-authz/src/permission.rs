//! Permission and permission-set primitives.
//!
//! # Purpose
//! Defines the `(module, action)` permission value and the per-identity set of
//! granted permissions, in the single canonical case used everywhere inside
//! the service.
//!
//! # Key invariants
//! - Inside the process, module and action are always lower-case.
//! - On the wire a [`Permission`] carries its module upper-case; deserializing
//!   accepts any case and normalizes back to lower-case.
//! - A [`PermissionSet`] never holds a module with an empty action set.
//!
//! # Examples
//! ```rust
//! use keyward_authz::Permission;
//!
//! let permission = Permission::new("TRADES", "Create");
//! assert_eq!(permission.module(), "trades");
//! assert_eq!(
//!     serde_json::to_string(&permission).unwrap(),
//!     r#"{"module":"TRADES","action":"create"}"#
//! );
//! ```
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Module → set of actions, the shape cached per identity.
pub type ActionMap = BTreeMap<String, BTreeSet<String>>;

/// Normalize an identifier to the internal comparison/storage case.
pub fn canonical_case(value: &str) -> String {
    value.to_lowercase()
}

/// Render a module identifier in its wire/display case.
pub fn display_case(module: &str) -> String {
    module.to_uppercase()
}

/// A single granted permission.
///
/// Fields are private so a value can only exist in canonical case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "WirePermission", into = "WirePermission")]
pub struct Permission {
    module: String,
    action: String,
}

impl Permission {
    pub fn new(module: impl AsRef<str>, action: impl AsRef<str>) -> Self {
        Self {
            module: canonical_case(module.as_ref()),
            action: canonical_case(action.as_ref()),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Module in wire/display case.
    pub fn display_module(&self) -> String {
        display_case(&self.module)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.display_module(), self.action)
    }
}

#[derive(Serialize, Deserialize)]
struct WirePermission {
    module: String,
    action: String,
}

impl From<WirePermission> for Permission {
    fn from(value: WirePermission) -> Self {
        Permission::new(value.module, value.action)
    }
}

impl From<Permission> for WirePermission {
    fn from(value: Permission) -> Self {
        WirePermission {
            module: display_case(&value.module),
            action: value.action,
        }
    }
}

/// The full set of permissions granted to one identity.
///
/// Serializes as the cache entry shape: a JSON object of module → sorted
/// action array, all lower-case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ActionMap", into = "ActionMap")]
pub struct PermissionSet {
    actions: ActionMap,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from an action map, normalizing case and dropping empty modules.
    pub fn from_action_map(map: ActionMap) -> Self {
        let mut set = Self::new();
        for (module, actions) in map {
            for action in actions {
                set.insert(&module, &action);
            }
        }
        set
    }

    /// Returns `true` if the pair was not already present.
    pub fn insert(&mut self, module: &str, action: &str) -> bool {
        self.actions
            .entry(canonical_case(module))
            .or_default()
            .insert(canonical_case(action))
    }

    /// Returns `true` if the pair was present.
    pub fn remove(&mut self, module: &str, action: &str) -> bool {
        let module = canonical_case(module);
        let Some(actions) = self.actions.get_mut(&module) else {
            return false;
        };
        let removed = actions.remove(&canonical_case(action));
        if actions.is_empty() {
            self.actions.remove(&module);
        }
        removed
    }

    pub fn contains(&self, module: &str, action: &str) -> bool {
        self.actions
            .get(&canonical_case(module))
            .is_some_and(|actions| actions.contains(&canonical_case(action)))
    }

    pub fn len(&self) -> usize {
        self.actions.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.actions.iter().flat_map(|(module, actions)| {
            actions.iter().map(move |action| Permission {
                module: module.clone(),
                action: action.clone(),
            })
        })
    }

    /// Permissions in a stable (module, action) order.
    pub fn to_vec(&self) -> Vec<Permission> {
        self.iter().collect()
    }

    pub fn action_map(&self) -> &ActionMap {
        &self.actions
    }

    pub fn into_action_map(self) -> ActionMap {
        self.actions
    }
}

impl From<ActionMap> for PermissionSet {
    fn from(value: ActionMap) -> Self {
        PermissionSet::from_action_map(value)
    }
}

impl From<PermissionSet> for ActionMap {
    fn from(value: PermissionSet) -> Self {
        value.actions
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        for permission in iter {
            set.actions
                .entry(permission.module)
                .or_default()
                .insert(permission.action);
        }
        set
    }
}
