use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OIDC userinfo response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Subject, matches the identity token's `sub`
    pub sub: String,
    /// Primary email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Whether the email address was verified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Provider-specific fields
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_keeps_unknown_fields() {
        let profile: UserProfile = serde_json::from_str(
            r#"{"sub":"user-1","email":"a@example.com","locale":"nb-NO"}"#,
        )
        .unwrap();

        assert_eq!(profile.email.as_deref(), Some("a@example.com"));
        assert_eq!(profile.name, None);
        assert_eq!(profile.extra["locale"], "nb-NO");
    }
}
