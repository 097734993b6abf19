//! Static permission schema.
//!
//! # Purpose
//! Defines the universe of valid `(module, action)` pairs. Every write path
//! consults this module before touching persistence.
//!
//! # Key invariants
//! - Lookups are case-insensitive for both module and action.
//! - The schema is not derived from stored data; stored rows outside the
//!   schema are still listed and checked, they just cannot be granted.
use crate::{AuthzError, AuthzResult, Module};

/// Returns `true` when `action` is allowed for `module`.
///
/// Pure function with no side effects.
pub fn is_valid(module: &str, action: &str) -> bool {
    validate(module, action).is_ok()
}

/// Resolve a `(module, action)` pair against the schema.
///
/// # Errors
/// - [`AuthzError::UnknownModule`] when the module is not in the schema.
/// - [`AuthzError::ActionNotAllowed`] when the action is not in the module's set.
pub fn validate(module: &str, action: &str) -> AuthzResult<(Module, &'static str)> {
    let parsed: Module = module
        .parse()
        .map_err(|_| AuthzError::UnknownModule(module.to_string()))?;
    let action = parsed
        .canonical_action(action)
        .ok_or_else(|| AuthzError::ActionNotAllowed {
            module: parsed.as_str().to_string(),
            action: action.to_lowercase(),
        })?;
    Ok((parsed, action))
}

/// Iterate the full schema as `(module, allowed actions)`.
pub fn entries() -> impl Iterator<Item = (Module, &'static [&'static str])> {
    Module::ALL.into_iter().map(|module| (module, module.actions()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_schema_pair() {
        for (module, actions) in entries() {
            for action in actions {
                assert!(is_valid(module.as_str(), action));
                assert!(is_valid(module.display_name(), &action.to_uppercase()));
            }
        }
    }

    #[test]
    fn rejects_action_outside_module() {
        assert!(!is_valid("TRADES", "delete"));
        assert!(!is_valid("trades", "read"));
        assert!(is_valid("INVENTORY", "delete"));
    }

    #[test]
    fn rejects_unknown_module_and_empty_input() {
        assert!(!is_valid("BILLING", "create"));
        assert!(!is_valid("", "create"));
        assert!(!is_valid("trades", ""));
    }

    #[test]
    fn validate_reports_reason() {
        assert_eq!(
            validate("billing", "create"),
            Err(AuthzError::UnknownModule("billing".to_string()))
        );
        assert_eq!(
            validate("Trades", "DELETE"),
            Err(AuthzError::ActionNotAllowed {
                module: "trades".to_string(),
                action: "delete".to_string(),
            })
        );
        assert_eq!(
            validate("trades", "Create_Manual"),
            Ok((Module::Trades, "create_manual"))
        );
    }
}
