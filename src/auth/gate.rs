use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::{principal::Principal, services::Authenticator};
use crate::{error::AppError, users::repo_types::Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePattern {
    Exact(&'static str),
    /// Matches the path itself and anything below it, segment-wise.
    Prefix(&'static str),
}

impl RoutePattern {
    fn matches(self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(p) => path == p,
            RoutePattern::Prefix(p) => match path.strip_prefix(p) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Role(Role),
}

#[derive(Debug, Clone, Copy)]
pub struct RouteRule {
    pub pattern: RoutePattern,
    pub access: Access,
}

const fn rule(pattern: RoutePattern, access: Access) -> RouteRule {
    RouteRule { pattern, access }
}

/// Evaluated top-down, first match wins. Unmatched paths need any principal.
pub static POLICY: &[RouteRule] = &[
    rule(RoutePattern::Exact("/api/users/create"), Access::Public),
    rule(RoutePattern::Exact("/api/auth/login"), Access::Public),
    rule(RoutePattern::Exact("/health"), Access::Public),
    rule(RoutePattern::Prefix("/api/users/delete"), Access::Role(Role::Admin)),
    rule(RoutePattern::Prefix("/api/users/update"), Access::Role(Role::Admin)),
    rule(RoutePattern::Exact("/api/users/all"), Access::Role(Role::Admin)),
    rule(RoutePattern::Prefix("/api/users/username"), Access::Role(Role::Admin)),
    rule(RoutePattern::Exact("/api/users/emails"), Access::Role(Role::Admin)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Unauthenticated => AppError::Unauthenticated,
            DenyReason::Forbidden => AppError::Forbidden,
        }
    }
}

pub fn required_access(path: &str) -> Access {
    POLICY
        .iter()
        .find(|r| r.pattern.matches(path))
        .map(|r| r.access)
        .unwrap_or(Access::Authenticated)
}

pub fn authorize(path: &str, principal: Option<&Principal>) -> Decision {
    match (required_access(path), principal) {
        (Access::Public, _) => Decision::Allow,
        (_, None) => Decision::Deny(DenyReason::Unauthenticated),
        (Access::Authenticated, Some(_)) => Decision::Allow,
        (Access::Role(role), Some(p)) if p.has_role(role) => Decision::Allow,
        (Access::Role(_), Some(_)) => Decision::Deny(DenyReason::Forbidden),
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
}

/// Resolves the principal from the bearer token, applies [`POLICY`] and, on
/// success, attaches the principal to the request for handlers to extract.
///
/// An invalid token is treated like no token at all: public routes stay
/// reachable, everything else answers `Unauthenticated`.
pub async fn access_gate(
    State(auth): State<Authenticator>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = bearer_token(&req).and_then(|t| auth.authenticate_with_token(t).ok());
    let path = req.uri().path().to_owned();

    match authorize(&path, principal.as_ref()) {
        Decision::Allow => {
            if let Some(p) = principal {
                debug!(username = %p.username, %path, "request authorized");
                req.extensions_mut().insert(p);
            }
            Ok(next.run(req).await)
        }
        Decision::Deny(reason) => {
            warn!(%path, ?reason, "request denied");
            Err(reason.into())
        }
    }
}
