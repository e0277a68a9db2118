//! # Authentication & Authorization Middleware
//!
//! Bearer token middleware with role-based access control.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {role}:{subject}:{secret}   role-scoped
//! Bearer {secret}                    legacy, treated as admin
//! ```
//!
//! For the `farmer` role the subject is the farmer id the caller may act for.
//! Admins and verifiers leave it empty.
//!
//! Note that the HTTP `admin` role only gates the endpoints. Whether a
//! registry write is authorized is decided by the registry itself, against
//! its current admin principal.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use farmcert_core::FarmerId;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ── Role ────────────────────────────────────────────────────────────────────

/// Roles, ordered by privilege level: `Farmer < Verifier < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Can upload and read their own application.
    Farmer,
    /// Can query certificates.
    Verifier,
    /// Full access, including certification decisions.
    Admin,
}

impl Role {
    /// Return the string representation of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Farmer => "farmer",
            Self::Verifier => "verifier",
            Self::Admin => "admin",
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller, injected by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub role: Role,
    /// Bound farmer, for the `farmer` role.
    pub farmer_id: Option<FarmerId>,
}

impl CallerIdentity {
    /// Identity used when auth is disabled or a legacy token is presented.
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            farmer_id: None,
        }
    }

    /// Check if the caller has at least the given minimum role.
    pub fn has_role(&self, minimum: Role) -> bool {
        self.role >= minimum
    }

    /// Admins see every farmer; a farmer sees only themselves; verifiers
    /// see no application records.
    pub fn can_access_farmer(&self, farmer_id: &FarmerId) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Verifier => false,
            Role::Farmer => self.farmer_id.as_ref() == Some(farmer_id),
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// Check that the caller has at least the required role (403 otherwise).
pub fn require_role(caller: &CallerIdentity, minimum: Role) -> Result<(), AppError> {
    if caller.has_role(minimum) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role '{}' required, caller has '{}'",
            minimum.as_str(),
            caller.role.as_str()
        )))
    }
}

/// Check that the caller may act on `farmer_id` (403 otherwise).
pub fn require_farmer_access(caller: &CallerIdentity, farmer_id: &FarmerId) -> Result<(), AppError> {
    if caller.can_access_farmer(farmer_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "caller may not access farmer {farmer_id}"
        )))
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// `Debug` redacts the token.
#[derive(Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer tokens.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse a bearer token of the form `{role}:{subject}:{secret}` or `{secret}`.
///
/// The whole token is first compared against the secret, so a secret that
/// itself contains `:` still authenticates in the bare form.
pub fn parse_bearer_token(provided: &str, expected_secret: &str) -> Result<CallerIdentity, String> {
    if constant_time_token_eq(provided, expected_secret) {
        return Ok(CallerIdentity::admin());
    }

    let parts: Vec<&str> = provided.splitn(3, ':').collect();

    match parts.as_slice() {
        [_] => Err("invalid bearer token".into()),
        [role_str, subject, secret] => {
            if !constant_time_token_eq(secret, expected_secret) {
                return Err("invalid bearer token".into());
            }

            let role = match *role_str {
                "admin" => Role::Admin,
                "verifier" => Role::Verifier,
                "farmer" => Role::Farmer,
                other => return Err(format!("unknown role: {other}")),
            };

            let farmer_id = match (role, subject.is_empty()) {
                (Role::Farmer, true) => return Err("farmer token must name a farmer id".into()),
                (Role::Farmer, false) => {
                    Some(FarmerId::new(*subject).map_err(|e| format!("invalid subject: {e}"))?)
                }
                _ => None,
            };

            Ok(CallerIdentity { role, farmer_id })
        }
        _ => Err("invalid token format, expected {role}:{subject}:{secret} or {secret}".into()),
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the Bearer token and inject the [`CallerIdentity`].
///
/// With no token configured every request is treated as admin.
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected_token = request.extensions().get::<AuthConfig>().cloned();

    match expected_token {
        Some(AuthConfig {
            token: Some(ref expected),
        }) => {
            let auth_header = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match auth_header.map(|v| v.strip_prefix("Bearer ")) {
                Some(Some(provided)) => match parse_bearer_token(provided, expected) {
                    Ok(identity) => {
                        request.extensions_mut().insert(identity);
                        next.run(request).await
                    }
                    Err(msg) => {
                        tracing::warn!(reason = %msg, "authentication failed");
                        unauthorized_response(&msg)
                    }
                },
                Some(None) => {
                    tracing::warn!("authentication failed: non-Bearer authorization scheme");
                    unauthorized_response("authorization header must use Bearer scheme")
                }
                None => {
                    tracing::warn!("authentication failed: missing authorization header");
                    unauthorized_response("missing authorization header")
                }
            }
        }
        _ => {
            request.extensions_mut().insert(CallerIdentity::admin());
            next.run(request).await
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app(token: Option<String>) -> Router {
        let auth_config = AuthConfig { token };
        Router::new()
            .route(
                "/whoami",
                get(|caller: CallerIdentity| async move { caller.role.as_str() }),
            )
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(auth_config))
    }

    async fn call(app: Router, auth: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(value) = auth {
            builder = builder.header("Authorization", value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn legacy_token_is_admin() {
        let (status, body) = call(test_app(Some("s3cret".into())), Some("Bearer s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "admin");
    }

    #[tokio::test]
    async fn role_token_injects_role() {
        let (status, body) =
            call(test_app(Some("s3cret".into())), Some("Bearer verifier::s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "verifier");
    }

    #[tokio::test]
    async fn missing_header_rejected() {
        let (status, body) = call(test_app(Some("s3cret".into())), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let err: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error"]["code"], "UNAUTHORIZED");
        assert!(err["error"]["message"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let (status, _) = call(test_app(Some("s3cret".into())), Some("Bearer admin::nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn basic_scheme_rejected() {
        let (status, body) =
            call(test_app(Some("s3cret".into())), Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Bearer scheme"));
    }

    #[tokio::test]
    async fn auth_disabled_acts_as_admin() {
        let (status, body) = call(test_app(None), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "admin");
    }

    #[test]
    fn farmer_token_binds_subject() {
        let caller = parse_bearer_token("farmer:F-42:k", "k").unwrap();
        assert_eq!(caller.role, Role::Farmer);
        let f42 = FarmerId::new("F-42").unwrap();
        let f43 = FarmerId::new("F-43").unwrap();
        assert!(caller.can_access_farmer(&f42));
        assert!(!caller.can_access_farmer(&f43));
    }

    #[test]
    fn farmer_token_without_subject_rejected() {
        assert!(parse_bearer_token("farmer::k", "k").is_err());
    }

    #[test]
    fn unknown_role_and_bad_shape_rejected() {
        assert!(parse_bearer_token("root::k", "k").unwrap_err().contains("unknown role"));
        assert!(parse_bearer_token("admin:k", "k").is_err());
    }

    #[test]
    fn secret_containing_colons() {
        let secret = "vault:v2:4f9a";
        assert_eq!(parse_bearer_token(secret, secret).unwrap().role, Role::Admin);

        let caller = parse_bearer_token("farmer:F-42:vault:v2:4f9a", secret).unwrap();
        assert_eq!(caller.role, Role::Farmer);
        assert_eq!(caller.farmer_id, Some(FarmerId::new("F-42").unwrap()));

        assert!(parse_bearer_token("vault:v2:other", secret).is_err());
    }

    #[test]
    fn constant_time_eq_behaviour() {
        assert!(constant_time_token_eq("secret-token-123", "secret-token-123"));
        assert!(!constant_time_token_eq("secret", "secret-token-123"));
        assert!(!constant_time_token_eq("", "secret-token-123"));
    }

    #[test]
    fn role_ordering() {
        assert!(Role::Farmer < Role::Verifier);
        assert!(Role::Verifier < Role::Admin);
        let verifier = CallerIdentity {
            role: Role::Verifier,
            farmer_id: None,
        };
        assert!(require_role(&verifier, Role::Verifier).is_ok());
        assert!(matches!(
            require_role(&verifier, Role::Admin),
            Err(AppError::Forbidden(_))
        ));
    }
}
