use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{
    db::Voter,
    mongodb::{id_as_hex, Id},
};

/// What a token holder may do.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Voter,
    Admin,
}

/// A kind of caller, identified by the role its tokens carry.
pub trait Principal {
    const ROLE: Role;
}

impl Principal for Voter {
    const ROLE: Role = Role::Voter;
}

/// Marker for election administrators. Their records live with the identity
/// provider, not here.
#[derive(Debug)]
pub struct Admin;

impl Principal for Admin {
    const ROLE: Role = Role::Admin;
}

/// A verified bearer token for a principal of type `P`.
///
/// Tokens are issued by the identity provider and signed with the shared
/// `jwt_secret`; this service only checks them.
#[derive(Debug)]
pub struct AuthToken<P> {
    id: Id,
    phantom: PhantomData<P>,
}

/// JWT claims.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(with = "id_as_hex")]
    sub: Id,
    role: Role,
    #[serde(with = "ts_seconds")]
    exp: DateTime<Utc>,
}

impl<P> AuthToken<P> {
    /// The ID of the principal this token was issued to.
    pub fn id(&self) -> Id {
        self.id
    }
}

impl<P: Principal> AuthToken<P> {
    /// Verify a raw JWT and check it was issued for role `P`.
    pub fn from_jwt(token: &str, config: &Config) -> Result<Self, Error> {
        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )?
        .claims;
        if claims.role != P::ROLE {
            return Err(Error::Status(
                Status::Forbidden,
                "This token does not grant access here".to_string(),
            ));
        }
        Ok(Self {
            id: claims.sub,
            phantom: PhantomData,
        })
    }
}

#[rocket::async_trait]
impl<'r, P> FromRequest<'r> for AuthToken<P>
where
    P: Principal + Send,
{
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            Outcome::Success(config) => config,
            _ => {
                return Outcome::Error((
                    Status::InternalServerError,
                    Error::Status(Status::InternalServerError, "Config not managed".to_string()),
                ))
            }
        };

        let Some(token) = req
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
        else {
            return Outcome::Error((
                Status::Unauthorized,
                Error::unauthorized("Missing bearer token"),
            ));
        };

        match Self::from_jwt(token.trim(), config) {
            Ok(token) => Outcome::Success(token),
            Err(e) => Outcome::Error((e.status(), e)),
        }
    }
}

/// Token minting for tests; in production the identity provider does this.
#[cfg(test)]
pub(crate) mod mint {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};
    use rocket::http::Header as HttpHeader;

    use super::*;

    pub fn token(id: Id, role: Role, jwt_secret: &str, ttl: Duration) -> String {
        let claims = Claims {
            sub: id,
            role,
            exp: Utc::now() + ttl,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(jwt_secret.as_bytes()),
        )
        .unwrap()
    }

    /// An `Authorization` header valid for the test configuration.
    pub fn bearer(id: Id, role: Role) -> HttpHeader<'static> {
        let token = token(id, role, "test-jwt-secret", Duration::hours(1));
        HttpHeader::new("Authorization", format!("Bearer {token}"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn config() -> Config {
        crate::test_figment().extract().unwrap()
    }

    #[test]
    fn accepts_tokens_for_the_right_role() {
        let id = Id::new();
        let token = mint::token(id, Role::Voter, "test-jwt-secret", Duration::hours(1));
        let verified = AuthToken::<Voter>::from_jwt(&token, &config()).unwrap();
        assert_eq!(verified.id(), id);
    }

    #[test]
    fn rejects_wrong_role() {
        let token = mint::token(Id::new(), Role::Voter, "test-jwt-secret", Duration::hours(1));
        let err = AuthToken::<Admin>::from_jwt(&token, &config()).unwrap_err();
        assert_eq!(err.status(), Status::Forbidden);
    }

    #[test]
    fn rejects_bad_signature_and_expiry() {
        let forged = mint::token(Id::new(), Role::Admin, "guessed", Duration::hours(1));
        assert!(matches!(
            AuthToken::<Admin>::from_jwt(&forged, &config()),
            Err(Error::Jwt(_))
        ));

        let expired = mint::token(Id::new(), Role::Admin, "test-jwt-secret", Duration::hours(-2));
        let err = AuthToken::<Admin>::from_jwt(&expired, &config()).unwrap_err();
        assert_eq!(err.status(), Status::Unauthorized);
    }
}
