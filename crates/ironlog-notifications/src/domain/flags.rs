//! Feature flags consulted by the scheduler.

use std::collections::HashSet;

/// Read-only feature flag lookup.
pub trait FeatureFlags: Send + Sync {
    /// Whether the flag is switched on.
    fn is_enabled(&self, flag: &str) -> bool;
}

/// Flags fixed at startup: everything is on except an explicit deny list.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlags {
    disabled: HashSet<String>,
}

impl StaticFeatureFlags {
    /// All flags enabled.
    #[must_use]
    pub fn all_enabled() -> Self {
        Self::default()
    }

    /// All flags enabled except the given ones.
    #[must_use]
    pub fn with_disabled<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disabled: flags.into_iter().map(Into::into).collect(),
        }
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn is_enabled(&self, flag: &str) -> bool {
        !self.disabled.contains(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_listed_flags_are_disabled() {
        let flags = StaticFeatureFlags::with_disabled(["notifications.welcome"]);

        assert!(!flags.is_enabled("notifications.welcome"));
        assert!(flags.is_enabled("notifications.generic"));
    }
}
