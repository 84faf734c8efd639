//! Extension lifecycle contract.

use crate::error::LifecycleError;

/// Extension lifecycle state.
///
/// An instance is `Constructed` until its identity fields are bound by
/// the self-registration call, which happens exactly once. After that it
/// is `Disabled` by default and moves between `Disabled` and `Enabled`
/// through [`set_enabled`](crate::Extension::set_enabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Instance exists but identity fields are not yet bound.
    Constructed,
    /// Identity bound, `on_enable` has not run (or `on_disable` has).
    Disabled,
    /// `on_enable` has run and the instance is active.
    Enabled,
}

impl LifecycleState {
    /// Check whether the instance can be enabled from this state.
    pub fn can_enable(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// Check whether the instance can be disabled from this state.
    pub fn can_disable(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Constructed => "constructed",
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
        };
        write!(f, "{}", name)
    }
}

/// The capability set every extension entry point implements.
///
/// All hooks default to no-ops so an extension only overrides what it
/// needs. `on_load` runs once per instance after the whole batch has
/// loaded; `on_enable`/`on_disable` run on each state transition. Errors
/// returned here are caught at the callback boundary and logged with the
/// extension's display name, never aborting sibling extensions.
pub trait ExtensionHooks: Send {
    /// Called once after every package in the batch has been loaded,
    /// before any extension is enabled.
    fn on_load(&mut self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Called when the extension transitions to enabled.
    fn on_enable(&mut self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Called when the extension transitions back to disabled.
    fn on_disable(&mut self) -> Result<(), LifecycleError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(LifecycleState::Disabled.can_enable());
        assert!(!LifecycleState::Enabled.can_enable());
        assert!(!LifecycleState::Constructed.can_enable());

        assert!(LifecycleState::Enabled.can_disable());
        assert!(!LifecycleState::Disabled.can_disable());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Constructed.to_string(), "constructed");
        assert_eq!(LifecycleState::Enabled.to_string(), "enabled");
    }

    #[test]
    fn test_default_hooks_are_noops() {
        struct Noop;
        impl ExtensionHooks for Noop {}

        let mut hooks = Noop;
        assert!(hooks.on_load().is_ok());
        assert!(hooks.on_enable().is_ok());
        assert!(hooks.on_disable().is_ok());
    }
}
