//! Caller identity from the `X-User-Id` header.
//!
//! Authentication proper happens upstream; this only reads the id the
//! gateway forwards and rejects requests without a well-formed one.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use genstream_domain::UserId;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Extractor for the calling user.
#[derive(Debug, Clone, Copy)]
pub struct Auth(pub UserId);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<UserId>().ok())
            .map(Auth)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    async fn whoami(Auth(user): Auth) -> String {
        user.to_string()
    }

    fn router() -> Router {
        Router::new().route("/", get(whoami))
    }

    #[tokio::test]
    async fn accepts_uuid_header() {
        let user = UserId::new();
        let request = Request::builder()
            .uri("/")
            .header("X-User-Id", user.to_string())
            .body(Body::empty())
            .unwrap();

        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], user.to_string().as_bytes());
    }

    #[tokio::test]
    async fn rejects_missing_or_malformed_header() {
        let missing = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(
            router().oneshot(missing).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );

        let malformed = Request::builder()
            .uri("/")
            .header("X-User-Id", "not-a-uuid")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            router().oneshot(malformed).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
