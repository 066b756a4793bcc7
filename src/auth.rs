use std::future::{ready, Ready};
use std::time::Duration;

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{Id, Role, User};
use crate::routes::AppState;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: Id,
    pub name: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Signs and verifies the session cookie.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    secure: bool,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration, secure: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            secure,
        }
    }

    /// Session cookie binding the client to `user`.
    pub fn issue(&self, user: &User) -> Result<Cookie<'static>, jsonwebtoken::errors::Error> {
        let exp = chrono::Utc::now().timestamp().max(0) as usize + self.ttl.as_secs() as usize;
        let claims = Claims { sub: user.id.to_string(), name: user.name.clone(), role: user.role, exp };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(self.cookie(token, CookieDuration::seconds(self.ttl.as_secs() as i64)))
    }

    /// Validate a session token and return who it belongs to.
    pub fn decode(&self, token: &str) -> Result<Identity, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let claims = decode::<Claims>(token, &self.decoding, &validation)?.claims;
        let user_id: Id = claims.sub.parse().map_err(|_| ErrorKind::InvalidSubject)?;
        Ok(Identity { user_id, name: claims.name, role: claims.role })
    }

    /// Expired cookie that makes the browser drop the session.
    pub fn clear(&self) -> Cookie<'static> {
        self.cookie(String::new(), CookieDuration::ZERO)
    }

    fn cookie(&self, value: String, max_age: CookieDuration) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE, value)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(max_age)
            .finish()
    }
}

/// Request-scoped identity. Missing, expired or forged cookies mean anonymous.
#[derive(Debug, Clone, Default)]
pub struct Session(pub Option<Identity>);

impl Session {
    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }

    pub fn is_admin(&self) -> bool {
        self.0.as_ref().is_some_and(Identity::is_admin)
    }

    /// Guard for handlers that need a logged-in user.
    pub fn require_user(&self) -> Result<&Identity, ApiError> {
        self.0.as_ref().ok_or(ApiError::Unauthorized)
    }

    /// Guard for post mutations: anyone but the admin gets 403.
    pub fn require_admin(&self) -> Result<&Identity, ApiError> {
        match self.0.as_ref() {
            Some(id) if id.is_admin() => Ok(id),
            _ => Err(ApiError::Forbidden),
        }
    }
}

impl FromRequest for Session {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            return ready(Err(actix_web::error::ErrorInternalServerError("session keys not configured")));
        };
        let identity = req
            .cookie(SESSION_COOKIE)
            .and_then(|c| match state.sessions.decode(c.value()) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring invalid session cookie");
                    None
                }
            });
        ready(Ok(Session(identity)))
    }
}
