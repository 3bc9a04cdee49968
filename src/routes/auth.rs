use crate::routes::errors::AuthErrorType;
use crate::routes::responses::{ApiError, api_error};
use crate::utils::types::Owner;
use axum::extract::FromRequestParts;
use http::StatusCode;
use http::request::Parts;
use log::debug;

pub const USERNAME_TOKEN_HEADER: &str = "username_token";

/// Owner of the request, taken from the `username_token` header
pub struct UsernameToken(pub Owner);

/// Lowercase letters, digits and underscores only, so the token is safe as a path part
pub fn is_valid_username_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl<S: Send + Sync> FromRequestParts<S> for UsernameToken {
    type Rejection = ApiError<AuthErrorType>;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(USERNAME_TOKEN_HEADER)
            .and_then(|header| header.to_str().ok())
            .unwrap_or_default();

        if !is_valid_username_token(token) {
            debug!("Rejected username token {:?}", token);
            return Err(api_error(
                StatusCode::FORBIDDEN,
                "access forbidden",
                Some(AuthErrorType::Forbidden),
            ));
        }

        Ok(UsernameToken(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_username_tokens() {
        for token in ["user1", "user_1", "abc", "_", "42"] {
            assert!(is_valid_username_token(token), "{token}");
        }
        for token in ["", "User1", "user-1", "user#1", "user 1", "../etc", "юзер"] {
            assert!(!is_valid_username_token(token), "{token}");
        }
    }

    #[tokio::test]
    async fn extracts_owner_from_header() {
        let (mut parts, _) = http::Request::builder()
            .header(USERNAME_TOKEN_HEADER, "user_1")
            .body(())
            .unwrap()
            .into_parts();

        let UsernameToken(owner) = UsernameToken::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(owner, "user_1");
    }
}
