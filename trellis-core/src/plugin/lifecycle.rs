//! Plugin lifecycle states and the transition rules between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states for state machine management.
///
/// ```text
/// Unknown -> Installed -> Enabled
///                ^    \      |
///                |     \     v
///                |      \ Disabled
///                |       \   |
///                v        v  v
///           (reinstall) Uninstalled
/// ```
///
/// `Installed` means installed but never enabled; `Disabled` means installed
/// and previously enabled. Both may be uninstalled, and an uninstalled plugin
/// may be installed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// No installation record exists
    Unknown,

    /// Installed, never enabled
    Installed,

    /// Installed and currently enabled
    Enabled,

    /// Installed, previously enabled, currently disabled
    Disabled,

    /// Previously installed; record retained for history
    Uninstalled,
}

impl Default for PluginState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl PluginState {
    /// Whether the plugin is installed in this state.
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed | Self::Enabled | Self::Disabled)
    }

    /// Whether the plugin is serving traffic in this state.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Valid target states from the current state.
    pub fn valid_transitions(&self) -> Vec<PluginState> {
        match self {
            Self::Unknown => vec![Self::Installed],
            Self::Installed => vec![Self::Enabled, Self::Uninstalled],
            Self::Enabled => vec![Self::Disabled],
            Self::Disabled => vec![Self::Enabled, Self::Uninstalled],
            Self::Uninstalled => vec![Self::Installed],
        }
    }

    /// Check whether a transition to the target state is valid.
    pub fn can_transition_to(&self, target: PluginState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Installed => "installed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Uninstalled => "uninstalled",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_rules() {
        assert!(PluginState::Unknown.can_transition_to(PluginState::Installed));
        assert!(PluginState::Installed.can_transition_to(PluginState::Enabled));
        assert!(PluginState::Enabled.can_transition_to(PluginState::Disabled));
        assert!(PluginState::Disabled.can_transition_to(PluginState::Enabled));
        assert!(PluginState::Disabled.can_transition_to(PluginState::Uninstalled));
        assert!(PluginState::Uninstalled.can_transition_to(PluginState::Installed));

        // Enable before install and uninstall while enabled are invalid.
        assert!(!PluginState::Unknown.can_transition_to(PluginState::Enabled));
        assert!(!PluginState::Enabled.can_transition_to(PluginState::Uninstalled));
    }

    #[test]
    fn state_predicates() {
        assert!(PluginState::Enabled.is_installed());
        assert!(PluginState::Disabled.is_installed());
        assert!(!PluginState::Uninstalled.is_installed());
        assert!(PluginState::Enabled.is_enabled());
        assert!(!PluginState::Disabled.is_enabled());
    }
}
