//! Per-kind notification policies.
//!
//! One generic scheduler and processor serve every kind. What differs per
//! kind is captured here: the kind string, the feature flag that can switch
//! it off, and the composer that renders it.

/// Kind of the post-registration welcome email.
pub const WELCOME_KIND: &str = "user.registration.welcome";

/// Kind of the trainer invitation email.
pub const TRAINER_INVITATION_KIND: &str = "trainer.invitation.created";

/// Composer key of the welcome template.
pub const WELCOME_COMPOSER: &str = "welcome";

/// Composer key of the trainer invitation template.
pub const TRAINER_INVITATION_COMPOSER: &str = "trainer_invitation";

/// Composer key of the passthrough composer for generic messages.
pub const GENERIC_COMPOSER: &str = "generic";

/// Feature flag that gates generic messages.
pub const GENERIC_FLAG: &str = "notifications.generic";

/// Value object describing how one notification kind is scheduled and
/// composed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// Notification kind, also the first part of the correlation key.
    pub kind: String,
    /// Feature flag consulted before scheduling.
    pub feature_flag: String,
    /// Key of the composer that renders this kind.
    pub composer_key: String,
}

impl NotificationPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        feature_flag: impl Into<String>,
        composer_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            feature_flag: feature_flag.into(),
            composer_key: composer_key.into(),
        }
    }

    /// Welcome email sent after registration.
    #[must_use]
    pub fn welcome() -> Self {
        Self::new(WELCOME_KIND, "notifications.welcome", WELCOME_COMPOSER)
    }

    /// Invitation email sent when a trainer invites a client.
    #[must_use]
    pub fn trainer_invitation() -> Self {
        Self::new(
            TRAINER_INVITATION_KIND,
            "notifications.trainer_invitation",
            TRAINER_INVITATION_COMPOSER,
        )
    }

    /// Free-form message of an arbitrary kind.
    #[must_use]
    pub fn generic(kind: impl Into<String>) -> Self {
        Self::new(kind, GENERIC_FLAG, GENERIC_COMPOSER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_policy_keeps_kind_and_shares_flag() {
        let policy = NotificationPolicy::generic("plan.shared");

        assert_eq!(policy.kind, "plan.shared");
        assert_eq!(policy.feature_flag, GENERIC_FLAG);
        assert_eq!(policy.composer_key, GENERIC_COMPOSER);
    }

    #[test]
    fn test_builtin_policies_use_distinct_flags() {
        assert_ne!(
            NotificationPolicy::welcome().feature_flag,
            NotificationPolicy::trainer_invitation().feature_flag
        );
    }
}
