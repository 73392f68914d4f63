//! Connection gateway: validates identity assertions before any room logic.
//!
//! The gateway trusts the caller-supplied identity claim. Token verification
//! is a documented no-op placeholder; a real deployment must replace it with
//! cryptographic verification before going to production.

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::Role;

/// Identity assertion supplied by a connecting participant.
///
/// Arrives as query parameters on the WebSocket upgrade request.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaim {
    /// Absent fields deserialize to empty strings and are rejected as missing
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub case_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Identity attached to a connection after validation.
///
/// Immutable for the lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedIdentity {
    pub participant_id: String,
    pub case_id: String,
    pub role: Role,
    pub display_name: String,
}

/// Authentication failures; these reject the connection outright
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error(
        "authentication failed: missing required fields (participant_id, case_id, role, display_name)"
    )]
    MissingFields,

    #[error("invalid role: {role}")]
    InvalidRole { role: String },
}

impl AuthError {
    /// Machine-checkable code carried on the wire alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingFields => "MISSING_FIELDS",
            AuthError::InvalidRole { .. } => "INVALID_ROLE",
        }
    }
}

/// Validate an identity claim against the roles this endpoint permits.
///
/// # Arguments
///
/// * `claim` - The caller-supplied identity assertion
/// * `allowed_roles` - Roles this listening endpoint accepts
///
/// # Returns
///
/// The validated identity to attach to the connection, or the reason the
/// connection must be rejected.
pub fn authenticate(
    claim: &IdentityClaim,
    allowed_roles: &[Role],
) -> Result<ValidatedIdentity, AuthError> {
    if claim.participant_id.trim().is_empty()
        || claim.case_id.trim().is_empty()
        || claim.role.trim().is_empty()
        || claim.display_name.trim().is_empty()
    {
        return Err(AuthError::MissingFields);
    }

    let role = Role::parse(&claim.role).ok_or_else(|| AuthError::InvalidRole {
        role: claim.role.clone(),
    })?;

    if !allowed_roles.contains(&role) {
        return Err(AuthError::InvalidRole {
            role: claim.role.clone(),
        });
    }

    // Token verification placeholder. Real deployments MUST verify the token
    // cryptographically here; absence of verification is a known limitation.
    let _ = &claim.token;

    Ok(ValidatedIdentity {
        participant_id: claim.participant_id.clone(),
        case_id: claim.case_id.clone(),
        role,
        display_name: claim.display_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ROLES: &[Role] = &[Role::User, Role::Volunteer, Role::Admin];

    fn valid_claim() -> IdentityClaim {
        IdentityClaim {
            participant_id: "alice".to_string(),
            case_id: "case-001".to_string(),
            role: "user".to_string(),
            display_name: "Alice".to_string(),
            token: None,
        }
    }

    #[test]
    fn test_authenticate_accepts_valid_claim() {
        // given:
        let claim = valid_claim();

        // when:
        let identity = authenticate(&claim, ALL_ROLES).unwrap();

        // then:
        assert_eq!(identity.participant_id, "alice");
        assert_eq!(identity.case_id, "case-001");
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.display_name, "Alice");
    }

    #[test]
    fn test_authenticate_rejects_empty_participant_id() {
        // given:
        let mut claim = valid_claim();
        claim.participant_id = "  ".to_string();

        // when:
        let result = authenticate(&claim, ALL_ROLES);

        // then:
        assert_eq!(result, Err(AuthError::MissingFields));
    }

    #[test]
    fn test_authenticate_rejects_empty_display_name() {
        // given:
        let mut claim = valid_claim();
        claim.display_name = "".to_string();

        // when:
        let result = authenticate(&claim, ALL_ROLES);

        // then:
        assert_eq!(result, Err(AuthError::MissingFields));
    }

    #[test]
    fn test_authenticate_rejects_unknown_role() {
        // given:
        let mut claim = valid_claim();
        claim.role = "moderator".to_string();

        // when:
        let result = authenticate(&claim, ALL_ROLES);

        // then:
        assert_eq!(
            result,
            Err(AuthError::InvalidRole {
                role: "moderator".to_string()
            })
        );
    }

    #[test]
    fn test_authenticate_rejects_role_outside_allow_list() {
        // given: an endpoint that only admits users and volunteers
        let mut claim = valid_claim();
        claim.role = "admin".to_string();

        // when:
        let result = authenticate(&claim, &[Role::User, Role::Volunteer]);

        // then:
        assert_eq!(
            result,
            Err(AuthError::InvalidRole {
                role: "admin".to_string()
            })
        );
    }

    #[test]
    fn test_authenticate_never_downgrades_privileges() {
        // given: a claim with a disallowed role
        let mut claim = valid_claim();
        claim.role = "admin".to_string();

        // when:
        let result = authenticate(&claim, &[Role::User]);

        // then: rejected outright, not silently admitted as another role
        assert!(result.is_err());
    }
}
