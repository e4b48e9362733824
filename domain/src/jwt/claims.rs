//! Claims carried by the access tokens clients present when opening a
//! real-time connection.
//!
//! The canonical identity is the numeric user id. Tokens minted by the
//! platform carry it in a `userId` claim; tokens that only carry a numeric
//! `sub` are accepted too.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: the user id, as a string.
    pub sub: String,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

impl AccessClaims {
    pub fn identity(&self) -> Option<i64> {
        self.user_id.or_else(|| self.sub.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, user_id: Option<i64>) -> AccessClaims {
        AccessClaims {
            sub: sub.to_string(),
            user_id,
            email: None,
            iss: None,
            exp: 0,
            iat: 0,
        }
    }

    #[test]
    fn test_user_id_claim_wins_over_subject() {
        assert_eq!(claims("someone@example.com", Some(4)).identity(), Some(4));
        assert_eq!(claims("9", Some(4)).identity(), Some(4));
    }

    #[test]
    fn test_numeric_subject_is_a_fallback() {
        assert_eq!(claims("17", None).identity(), Some(17));
        assert_eq!(claims("someone@example.com", None).identity(), None);
    }

    #[test]
    fn test_user_id_uses_camel_case_on_the_wire() {
        let parsed: AccessClaims =
            serde_json::from_str(r#"{"sub":"a","userId":3,"exp":1,"iat":0}"#).unwrap();
        assert_eq!(parsed.user_id, Some(3));
    }
}
