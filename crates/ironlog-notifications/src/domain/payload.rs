//! Versioned notification payloads.
//!
//! Payloads are stored as JSON inside an envelope carrying a schema version:
//!
//! ```json
//! { "schema_version": 1, "payload": { "type": "welcome", "user_id": "...", ... } }
//! ```
//!
//! The store treats the envelope as opaque; it is validated when the
//! processor decodes it for composition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::PayloadError;
use super::policy::{TRAINER_INVITATION_KIND, WELCOME_KIND};

/// Schema version written by this build.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// Data for the welcome email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomePayload {
    /// Identifier of the registered user.
    pub user_id: String,
    /// Name used in the greeting.
    pub display_name: String,
}

/// Data for the trainer invitation email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerInvitationPayload {
    /// Name of the inviting trainer.
    pub trainer_name: String,
    /// Link the invitee follows to accept.
    pub accept_url: String,
    /// When the invitation lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Data for a free-form message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericPayload {
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Payload of a notification, tagged by type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationPayload {
    /// See [`WelcomePayload`].
    Welcome(WelcomePayload),
    /// See [`TrainerInvitationPayload`].
    TrainerInvitation(TrainerInvitationPayload),
    /// See [`GenericPayload`].
    Generic(GenericPayload),
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema_version: u32,
    payload: &'a NotificationPayload,
}

#[derive(Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

#[derive(Deserialize)]
struct Envelope {
    payload: NotificationPayload,
}

impl NotificationPayload {
    /// The serialized `type` tag.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "welcome",
            Self::TrainerInvitation(_) => "trainer_invitation",
            Self::Generic(_) => "generic",
        }
    }

    /// Whether this payload may be stored under `kind`. The built-in kinds
    /// require their own payload type; every other kind takes generic
    /// payloads.
    #[must_use]
    pub fn matches_kind(&self, kind: &str) -> bool {
        match self {
            Self::Welcome(_) => kind == WELCOME_KIND,
            Self::TrainerInvitation(_) => kind == TRAINER_INVITATION_KIND,
            Self::Generic(_) => kind != WELCOME_KIND && kind != TRAINER_INVITATION_KIND,
        }
    }

    /// Wraps the payload in a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Malformed` if serialization fails.
    pub fn to_envelope(&self) -> Result<Value, PayloadError> {
        serde_json::to_value(EnvelopeRef {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            payload: self,
        })
        .map_err(|e| PayloadError::Malformed(e.to_string()))
    }

    /// Decodes an envelope stored under `kind`.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError` if the envelope is malformed, carries an
    /// unknown schema version, or holds a payload of another kind.
    pub fn decode(kind: &str, value: &Value) -> Result<Self, PayloadError> {
        let probe = VersionProbe::deserialize(value)
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;
        if probe.schema_version != PAYLOAD_SCHEMA_VERSION {
            return Err(PayloadError::UnsupportedVersion {
                found: probe.schema_version,
                expected: PAYLOAD_SCHEMA_VERSION,
            });
        }

        let envelope =
            Envelope::deserialize(value).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        if !envelope.payload.matches_kind(kind) {
            return Err(PayloadError::KindMismatch {
                kind: kind.to_owned(),
                payload_type: envelope.payload.type_name(),
            });
        }
        Ok(envelope.payload)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn welcome() -> NotificationPayload {
        NotificationPayload::Welcome(WelcomePayload {
            user_id: "user-1".to_owned(),
            display_name: "Ada".to_owned(),
        })
    }

    #[test]
    fn test_envelope_carries_schema_version_and_tag() {
        let value = welcome().to_envelope().unwrap();

        assert_eq!(value["schema_version"], json!(1));
        assert_eq!(value["payload"]["type"], json!("welcome"));
        assert_eq!(value["payload"]["display_name"], json!("Ada"));
    }

    #[test]
    fn test_decode_accepts_matching_kind() {
        let value = welcome().to_envelope().unwrap();

        let decoded = NotificationPayload::decode(WELCOME_KIND, &value).unwrap();

        assert_eq!(decoded, welcome());
    }

    #[test]
    fn test_decode_rejects_payload_of_another_kind() {
        let value = welcome().to_envelope().unwrap();

        let err = NotificationPayload::decode(TRAINER_INVITATION_KIND, &value).unwrap_err();

        assert_eq!(
            err,
            PayloadError::KindMismatch {
                kind: TRAINER_INVITATION_KIND.to_owned(),
                payload_type: "welcome",
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_schema_version() {
        let value = json!({"schema_version": 2, "payload": {"type": "generic"}});

        let err = NotificationPayload::decode("plan.shared", &value).unwrap_err();

        assert_eq!(
            err,
            PayloadError::UnsupportedVersion {
                found: 2,
                expected: 1
            }
        );
    }

    #[test]
    fn test_decode_reports_missing_fields_as_malformed() {
        let value = json!({"schema_version": 1, "payload": {"type": "generic", "subject": "hi"}});

        let err = NotificationPayload::decode("plan.shared", &value).unwrap_err();

        assert!(matches!(err, PayloadError::Malformed(_)));
    }

    #[test]
    fn test_generic_payload_matches_any_custom_kind() {
        let generic = NotificationPayload::Generic(GenericPayload {
            subject: "s".to_owned(),
            body: "b".to_owned(),
        });

        assert!(generic.matches_kind("plan.shared"));
        assert!(!generic.matches_kind(WELCOME_KIND));
    }
}
