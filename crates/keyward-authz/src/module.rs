use serde::{Deserialize, Serialize};

/// Modules known to the permission schema.
///
/// `as_str` is the storage form (lower-case); `display_name` is the form shown
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Module {
    Trades,
    Inventory,
}

impl Module {
    pub const ALL: [Module; 2] = [Module::Trades, Module::Inventory];

    pub fn as_str(self) -> &'static str {
        match self {
            Module::Trades => "trades",
            Module::Inventory => "inventory",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Module::Trades => "TRADES",
            Module::Inventory => "INVENTORY",
        }
    }

    /// Actions the schema allows for this module, in storage form.
    pub fn actions(self) -> &'static [&'static str] {
        match self {
            Module::Trades => &["create", "create_manual"],
            Module::Inventory => &["create", "read", "update", "delete"],
        }
    }

    /// Look up an action in this module's allowed set.
    ///
    /// The comparison is case-insensitive; the returned string is the
    /// canonical storage form.
    pub fn canonical_action(self, action: &str) -> Option<&'static str> {
        let action = action.to_lowercase();
        self.actions()
            .iter()
            .copied()
            .find(|allowed| *allowed == action)
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for Module {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "trades" => Ok(Module::Trades),
            "inventory" => Ok(Module::Inventory),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Module;

    #[test]
    fn module_string_roundtrip() {
        for module in Module::ALL {
            assert_eq!(module.as_str().parse::<Module>().ok(), Some(module));
            assert_eq!(module.display_name().parse::<Module>().ok(), Some(module));
            assert_eq!(module.to_string(), module.display_name());
        }
    }

    #[test]
    fn module_from_str_is_case_insensitive() {
        assert_eq!("TrAdEs".parse::<Module>().ok(), Some(Module::Trades));
        assert!("billing".parse::<Module>().is_err());
        assert!("".parse::<Module>().is_err());
    }

    #[test]
    fn canonical_action_lowercases_and_filters() {
        assert_eq!(Module::Trades.canonical_action("CREATE"), Some("create"));
        assert_eq!(
            Module::Trades.canonical_action("Create_Manual"),
            Some("create_manual")
        );
        assert_eq!(Module::Trades.canonical_action("delete"), None);
        assert_eq!(Module::Inventory.canonical_action("delete"), Some("delete"));
    }

    #[test]
    fn serde_uses_display_name() {
        let json = serde_json::to_string(&Module::Inventory).expect("serialize");
        assert_eq!(json, "\"INVENTORY\"");
    }
}
