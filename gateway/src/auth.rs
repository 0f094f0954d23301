//! Route-level auth guards (spec §4.6 "Route-level guards"): a verified
//! bearer token produces an [`AuthContext`] that is threaded through
//! handlers via `actix-web`'s extension map, mirroring §9's "model as an
//! explicit `RequestContext` value threaded through handlers" guidance
//! rather than the source's reflection-on-`req.auth` pattern.
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error as ActixError, HttpMessage,
};
use futures::future::LocalBoxFuture;
use jsonwebtoken::{decode, DecodingKey, Validation};
use pgai_common::ErrorKind;
use serde::{Deserialize, Serialize};

/// Role hierarchy `viewer < user < admin < super_admin` (§4.6); variant
/// declaration order is the derived `Ord`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    User,
    Admin,
    SuperAdmin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub team: Option<String>,
    pub permissions: Vec<String>,
}

impl AuthContext {
    pub fn permissions_header(&self) -> String {
        self.permissions.join(",")
    }

    pub fn owns(&self, resource_user_id: &str) -> bool {
        self.role >= Role::Admin || self.user_id == resource_user_id
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    role: Role,
    team: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[allow(dead_code)]
    exp: usize,
}

/// Verifies bearer tokens against the configured JWT secret. A trait so
/// tests can substitute a fixed-output verifier, the same shape as the
/// teacher's `tokenserver_auth::VerifyToken`.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AuthContext, ErrorKind>;
}

pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: &str) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        JwtVerifier {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<AuthContext, ErrorKind> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| ErrorKind::Authentication)?;
        Ok(AuthContext {
            user_id: data.claims.sub,
            email: data.claims.email,
            role: data.claims.role,
            team: data.claims.team,
            permissions: data.claims.permissions,
        })
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// `authenticate`: a valid bearer token is required, else 401.
#[derive(Clone)]
pub struct Authenticate {
    pub verifier: Arc<dyn TokenVerifier>,
}

impl<S, B> Transform<S, ServiceRequest> for Authenticate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = AuthenticateMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthenticateMiddleware {
            service: Rc::new(RefCell::new(service)),
            verifier: self.verifier.clone(),
            optional: false,
        }))
    }
}

/// `optionalAuthenticate`: a token is verified if present; its absence
/// leaves the request anonymous rather than rejecting it.
#[derive(Clone)]
pub struct OptionalAuthenticate {
    pub verifier: Arc<dyn TokenVerifier>,
}

impl<S, B> Transform<S, ServiceRequest> for OptionalAuthenticate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = AuthenticateMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthenticateMiddleware {
            service: Rc::new(RefCell::new(service)),
            verifier: self.verifier.clone(),
            optional: true,
        }))
    }
}

pub struct AuthenticateMiddleware<S> {
    service: Rc<RefCell<S>>,
    verifier: Arc<dyn TokenVerifier>,
    optional: bool,
}

impl<S, B> Service<ServiceRequest> for AuthenticateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = bearer_token(&req);
        let service = self.service.clone();
        let verifier = self.verifier.clone();
        let optional = self.optional;

        Box::pin(async move {
            match (token, optional) {
                (Some(token), _) => match verifier.verify(&token) {
                    Ok(ctx) => {
                        req.extensions_mut().insert(ctx);
                        service.call(req).await
                    }
                    Err(kind) => Err(ActixError::from(pgai_common::ApiError::new(kind))),
                },
                (None, true) => service.call(req).await,
                (None, false) => {
                    Err(ActixError::from(pgai_common::ApiError::new(ErrorKind::Authentication)))
                }
            }
        })
    }
}

/// `authorize(role)`: the authenticated context (inserted by `Authenticate`)
/// must carry at least `required`.
pub fn authorize(req: &ServiceRequest, required: Role) -> Result<AuthContext, ErrorKind> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or(ErrorKind::Authentication)?;
    if ctx.role >= required {
        Ok(ctx)
    } else {
        Err(ErrorKind::Authorization)
    }
}

/// `requireOwnership(param)`: the caller may only reach their own scoped
/// resource unless their role is `>= admin`.
pub fn require_ownership(ctx: &AuthContext, resource_user_id: &str) -> Result<(), ErrorKind> {
    if ctx.owns(resource_user_id) {
        Ok(())
    } else {
        Err(ErrorKind::Authorization)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn role_hierarchy_orders_as_specified() {
        assert!(Role::Viewer < Role::User);
        assert!(Role::User < Role::Admin);
        assert!(Role::Admin < Role::SuperAdmin);
    }

    #[test]
    fn owns_allows_admin_cross_user_access() {
        let ctx = AuthContext {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            role: Role::Admin,
            team: None,
            permissions: vec![],
        };
        assert!(ctx.owns("someone-else"));
    }

    #[test]
    fn owns_denies_plain_user_cross_user_access() {
        let ctx = AuthContext {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            role: Role::User,
            team: None,
            permissions: vec![],
        };
        assert!(!ctx.owns("someone-else"));
        assert!(ctx.owns("u1"));
    }
}
