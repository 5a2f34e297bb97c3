//! Registry of notification policies and composers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ironlog_core::error::PipelineError;

use super::message::{Composer, RenderedMessage};
use super::payload::NotificationPayload;
use super::policy::NotificationPolicy;

/// Maps kinds to policies and composer keys to composers.
///
/// Kinds without a registered policy resolve to
/// [`NotificationPolicy::generic`] when the generic fallback is enabled.
#[derive(Clone, Default)]
pub struct NotificationCatalog {
    policies: HashMap<String, NotificationPolicy>,
    composers: HashMap<String, Arc<dyn Composer>>,
    generic_fallback: bool,
}

impl fmt::Debug for NotificationCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut composers: Vec<&String> = self.composers.keys().collect();
        composers.sort();
        f.debug_struct("NotificationCatalog")
            .field("policies", &self.policies)
            .field("composers", &composers)
            .field("generic_fallback", &self.generic_fallback)
            .finish()
    }
}

impl NotificationCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a policy under its kind.
    #[must_use]
    pub fn with_policy(mut self, policy: NotificationPolicy) -> Self {
        self.policies.insert(policy.kind.clone(), policy);
        self
    }

    /// Registers a composer under a key.
    #[must_use]
    pub fn with_composer(mut self, key: impl Into<String>, composer: Arc<dyn Composer>) -> Self {
        self.composers.insert(key.into(), composer);
        self
    }

    /// Resolves unregistered kinds to the generic policy.
    #[must_use]
    pub fn with_generic_fallback(mut self) -> Self {
        self.generic_fallback = true;
        self
    }

    /// Returns the policy for `kind`, if any.
    #[must_use]
    pub fn policy_for(&self, kind: &str) -> Option<NotificationPolicy> {
        self.policies
            .get(kind)
            .cloned()
            .or_else(|| self.generic_fallback.then(|| NotificationPolicy::generic(kind)))
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Renders `payload` with the composer registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::UnknownKind` if no policy or composer is
    /// registered, or `PipelineError::Compose` if rendering fails.
    pub fn compose(
        &self,
        kind: &str,
        payload: &NotificationPayload,
    ) -> Result<RenderedMessage, PipelineError> {
        let policy = self
            .policy_for(kind)
            .ok_or_else(|| PipelineError::UnknownKind(kind.to_owned()))?;
        let composer = self
            .composers
            .get(&policy.composer_key)
            .ok_or_else(|| PipelineError::UnknownKind(policy.composer_key.clone()))?;
        composer
            .compose(payload)
            .map_err(|e| PipelineError::Compose(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ComposeError;
    use crate::domain::payload::GenericPayload;

    struct Echo;

    impl Composer for Echo {
        fn compose(&self, payload: &NotificationPayload) -> Result<RenderedMessage, ComposeError> {
            Ok(RenderedMessage {
                subject: payload.type_name().to_owned(),
                text_body: String::new(),
                html_body: None,
            })
        }
    }

    fn generic() -> NotificationPayload {
        NotificationPayload::Generic(GenericPayload {
            subject: "s".to_owned(),
            body: "b".to_owned(),
        })
    }

    #[test]
    fn test_policy_for_unregistered_kind_requires_fallback() {
        let strict = NotificationCatalog::new();
        let lenient = NotificationCatalog::new().with_generic_fallback();

        assert!(strict.policy_for("plan.shared").is_none());
        assert_eq!(
            lenient.policy_for("plan.shared"),
            Some(NotificationPolicy::generic("plan.shared"))
        );
    }

    #[test]
    fn test_compose_routes_through_policy_composer_key() {
        let catalog = NotificationCatalog::new()
            .with_generic_fallback()
            .with_composer("generic", Arc::new(Echo));

        let message = catalog.compose("plan.shared", &generic()).unwrap();

        assert_eq!(message.subject, "generic");
    }

    #[test]
    fn test_compose_without_composer_is_unknown_kind() {
        let catalog = NotificationCatalog::new().with_policy(NotificationPolicy::welcome());

        let err = catalog
            .compose("user.registration.welcome", &generic())
            .unwrap_err();

        assert!(matches!(err, PipelineError::UnknownKind(ref key) if key == "welcome"));
    }
}
