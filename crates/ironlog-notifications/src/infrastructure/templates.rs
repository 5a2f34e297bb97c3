//! Handlebars-backed composers and the standard catalog.

use std::sync::Arc;

use handlebars::Handlebars;
use serde::Serialize;

use crate::domain::catalog::NotificationCatalog;
use crate::domain::error::ComposeError;
use crate::domain::message::{Composer, RenderedMessage};
use crate::domain::payload::{NotificationPayload, TrainerInvitationPayload};
use crate::domain::policy::{
    GENERIC_COMPOSER, NotificationPolicy, TRAINER_INVITATION_COMPOSER, WELCOME_COMPOSER,
};

// Plain-text parts use triple braces so names are not HTML-escaped.
const TEMPLATES: &[(&str, &str)] = &[
    ("welcome_subject", "Welcome to Ironlog, {{{display_name}}}!"),
    (
        "welcome_text",
        "Hi {{{display_name}}},\n\nYour Ironlog account is ready. Log your first training \
         whenever you like.\n\nThe Ironlog team\n",
    ),
    (
        "welcome_html",
        "<p>Hi {{display_name}},</p><p>Your Ironlog account is ready. Log your first training \
         whenever you like.</p><p>The Ironlog team</p>",
    ),
    (
        "trainer_invitation_subject",
        "{{{trainer_name}}} invited you to train together on Ironlog",
    ),
    (
        "trainer_invitation_text",
        "{{{trainer_name}}} would like to coach you on Ironlog.\n\nAccept the invitation: \
         {{{accept_url}}}\n{{#if expires_on}}The invitation expires on {{{expires_on}}}.\n{{/if}}",
    ),
    (
        "trainer_invitation_html",
        "<p>{{trainer_name}} would like to coach you on Ironlog.</p>\
         <p><a href=\"{{accept_url}}\">Accept the invitation</a></p>\
         {{#if expires_on}}<p>The invitation expires on {{expires_on}}.</p>{{/if}}",
    ),
];

#[derive(Serialize)]
struct InvitationView<'a> {
    trainer_name: &'a str,
    accept_url: &'a str,
    expires_on: String,
}

impl<'a> From<&'a TrainerInvitationPayload> for InvitationView<'a> {
    fn from(payload: &'a TrainerInvitationPayload) -> Self {
        Self {
            trainer_name: &payload.trainer_name,
            accept_url: &payload.accept_url,
            expires_on: payload
                .expires_at
                .map(|at| at.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        }
    }
}

/// Renders the built-in kinds from Handlebars templates in strict mode, so a
/// missing variable is a composition error rather than an empty string.
pub struct TemplateComposer {
    handlebars: Handlebars<'static>,
}

impl TemplateComposer {
    /// Creates a composer with all built-in templates registered.
    ///
    /// # Errors
    ///
    /// Returns `ComposeError::Template` if a template fails to parse.
    pub fn new() -> Result<Self, ComposeError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        for (name, source) in TEMPLATES {
            handlebars
                .register_template_string(name, source)
                .map_err(|e| ComposeError::Template {
                    name: (*name).to_owned(),
                    message: e.to_string(),
                })?;
        }
        Ok(Self { handlebars })
    }

    fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String, ComposeError> {
        self.handlebars
            .render(name, data)
            .map_err(|e| ComposeError::Render(e.to_string()))
    }

    fn render_set<T: Serialize>(
        &self,
        prefix: &str,
        data: &T,
    ) -> Result<RenderedMessage, ComposeError> {
        tracing::debug!(template = prefix, "rendering notification");
        Ok(RenderedMessage {
            subject: self.render(&format!("{prefix}_subject"), data)?,
            text_body: self.render(&format!("{prefix}_text"), data)?,
            html_body: Some(self.render(&format!("{prefix}_html"), data)?),
        })
    }
}

impl Composer for TemplateComposer {
    fn compose(&self, payload: &NotificationPayload) -> Result<RenderedMessage, ComposeError> {
        match payload {
            NotificationPayload::Welcome(welcome) => self.render_set("welcome", welcome),
            NotificationPayload::TrainerInvitation(invitation) => {
                self.render_set("trainer_invitation", &InvitationView::from(invitation))
            }
            NotificationPayload::Generic(_) => Err(ComposeError::Unsupported {
                composer: "template",
                payload_type: payload.type_name(),
            }),
        }
    }
}

/// Uses a generic payload's subject and body verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughComposer;

impl Composer for PassthroughComposer {
    fn compose(&self, payload: &NotificationPayload) -> Result<RenderedMessage, ComposeError> {
        match payload {
            NotificationPayload::Generic(generic) => Ok(RenderedMessage {
                subject: generic.subject.clone(),
                text_body: generic.body.clone(),
                html_body: None,
            }),
            other => Err(ComposeError::Unsupported {
                composer: GENERIC_COMPOSER,
                payload_type: other.type_name(),
            }),
        }
    }
}

/// Catalog with the welcome and trainer invitation policies, their
/// templates, and the generic fallback.
///
/// # Errors
///
/// Returns `ComposeError::Template` if a built-in template fails to parse.
pub fn standard_catalog() -> Result<NotificationCatalog, ComposeError> {
    let templates: Arc<dyn Composer> = Arc::new(TemplateComposer::new()?);
    Ok(NotificationCatalog::new()
        .with_policy(NotificationPolicy::welcome())
        .with_policy(NotificationPolicy::trainer_invitation())
        .with_composer(WELCOME_COMPOSER, Arc::clone(&templates))
        .with_composer(TRAINER_INVITATION_COMPOSER, templates)
        .with_composer(GENERIC_COMPOSER, Arc::new(PassthroughComposer))
        .with_generic_fallback())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::payload::{GenericPayload, WelcomePayload};
    use crate::domain::policy::{TRAINER_INVITATION_KIND, WELCOME_KIND};

    #[test]
    fn test_welcome_renders_subject_and_both_bodies() {
        let composer = TemplateComposer::new().unwrap();
        let payload = NotificationPayload::Welcome(WelcomePayload {
            user_id: "user-1".to_owned(),
            display_name: "Ada <Admin>".to_owned(),
        });

        let message = composer.compose(&payload).unwrap();

        assert_eq!(message.subject, "Welcome to Ironlog, Ada <Admin>!");
        assert!(message.text_body.starts_with("Hi Ada <Admin>,"));
        assert!(message.html_body.unwrap().contains("Ada &lt;Admin&gt;"));
    }

    #[test]
    fn test_invitation_mentions_expiry_only_when_present() {
        let composer = TemplateComposer::new().unwrap();
        let mut invitation = TrainerInvitationPayload {
            trainer_name: "Sam".to_owned(),
            accept_url: "https://ironlog.example/invite/abc".to_owned(),
            expires_at: None,
        };

        let open = composer
            .compose(&NotificationPayload::TrainerInvitation(invitation.clone()))
            .unwrap();
        invitation.expires_at = Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        let expiring = composer
            .compose(&NotificationPayload::TrainerInvitation(invitation))
            .unwrap();

        assert!(!open.text_body.contains("expires"));
        assert!(expiring.text_body.contains("expires on 2026-02-01"));
    }

    #[test]
    fn test_template_composer_rejects_generic_payloads() {
        let composer = TemplateComposer::new().unwrap();
        let payload = NotificationPayload::Generic(GenericPayload {
            subject: "s".to_owned(),
            body: "b".to_owned(),
        });

        let err = composer.compose(&payload).unwrap_err();

        assert!(matches!(err, ComposeError::Unsupported { .. }));
    }

    #[test]
    fn test_standard_catalog_covers_builtin_and_custom_kinds() {
        let catalog = standard_catalog().unwrap();
        let generic = NotificationPayload::Generic(GenericPayload {
            subject: "Plan shared".to_owned(),
            body: "Your trainer shared a plan.".to_owned(),
        });

        let message = catalog.compose("plan.shared", &generic).unwrap();

        assert_eq!(catalog.kinds(), vec![TRAINER_INVITATION_KIND, WELCOME_KIND]);
        assert_eq!(message.subject, "Plan shared");
    }
}
