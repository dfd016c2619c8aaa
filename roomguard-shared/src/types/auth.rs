use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims issued by the authentication provider.
///
/// `sub` is the provider's opaque, stable user id; `email` is the identity
/// string every moderation record is keyed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn new(uid: impl Into<String>, email: impl Into<String>, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: uid.into(),
            email: email.into(),
            iat: now,
            exp: now + duration_secs,
            jti: Uuid::now_v7(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub token_id: Uuid,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            uid: claims.sub,
            email: claims.email,
            token_id: claims.jti,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_claims_are_not_expired() {
        let claims = Claims::new("uid-1", "a@x.com", 3600);
        assert!(!claims.is_expired());

        let user = AuthUser::from(claims.clone());
        assert_eq!(user.uid, "uid-1");
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.token_id, claims.jti);
    }

    #[test]
    fn negative_duration_is_expired() {
        let claims = Claims::new("uid-1", "a@x.com", -10);
        assert!(claims.is_expired());
    }
}
