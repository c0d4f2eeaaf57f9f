use chrono::{Duration, Utc};
use diesel::prelude::*;
use rand::Rng;
use sha2::{Digest, Sha256};

use heritage_shared::errors::{AppError, AppResult, ErrorCode};
use heritage_shared::middleware::encode_access_token;
use heritage_shared::types::auth::{Claims, TokenPair};

use crate::config::AppConfig;
use crate::models::{NewRefreshToken, RefreshToken, User};
use crate::schema::{refresh_tokens, roles, users};

pub fn create_access_token(
    user: &User,
    role: Option<String>,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, AppError> {
    let claims = Claims::new(user.id, user.email.clone(), role, user.sys_admin, ttl_secs);
    encode_access_token(&claims, secret)
}

pub fn create_refresh_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn role_name(conn: &mut PgConnection, user: &User) -> AppResult<Option<String>> {
    let Some(role_id) = user.role_id else {
        return Ok(None);
    };
    Ok(roles::table
        .find(role_id)
        .select(roles::name)
        .first::<String>(conn)
        .optional()?)
}

/// Issues an access token and stores the hash of a fresh refresh token.
pub fn issue_token_pair(conn: &mut PgConnection, user: &User, config: &AppConfig) -> AppResult<TokenPair> {
    let role = role_name(conn, user)?;
    let access_token = create_access_token(user, role, &config.jwt_secret, config.jwt_access_ttl)?;
    let refresh_token = create_refresh_token();

    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            user_id: user.id,
            token_hash: hash_token(&refresh_token),
            expires_at: Utc::now() + Duration::seconds(config.jwt_refresh_ttl),
        })
        .execute(conn)?;

    Ok(TokenPair::new(access_token, refresh_token, config.jwt_access_ttl))
}

/// Revokes the presented refresh token and issues a new pair.
pub fn rotate_refresh_token(conn: &mut PgConnection, raw: &str, config: &AppConfig) -> AppResult<TokenPair> {
    let token_hash = hash_token(raw);

    conn.transaction(|conn| {
        let stored: RefreshToken = refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(&token_hash))
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::new(ErrorCode::TokenInvalid, "invalid refresh token"))?;

        if stored.revoked_at.is_some() {
            return Err(AppError::new(ErrorCode::RefreshTokenRevoked, "refresh token has been revoked"));
        }
        if stored.expires_at < Utc::now() {
            return Err(AppError::new(ErrorCode::TokenExpired, "refresh token expired"));
        }

        diesel::update(refresh_tokens::table.find(stored.id))
            .set(refresh_tokens::revoked_at.eq(Some(Utc::now())))
            .execute(conn)?;

        let user: User = users::table
            .find(stored.user_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::new(ErrorCode::TokenInvalid, "invalid refresh token"))?;
        if !user.can_log_in() {
            return Err(AppError::new(ErrorCode::AccountInactive, "account is inactive"));
        }

        issue_token_pair(conn, &user, config)
    })
}

pub fn revoke_refresh_token(conn: &mut PgConnection, raw: &str) -> AppResult<()> {
    diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(hash_token(raw)))
            .filter(refresh_tokens::revoked_at.is_null()),
    )
    .set(refresh_tokens::revoked_at.eq(Some(Utc::now())))
    .execute(conn)?;
    Ok(())
}

pub fn revoke_all_for_user(conn: &mut PgConnection, user_id: i32) -> AppResult<usize> {
    Ok(diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::user_id.eq(user_id))
            .filter(refresh_tokens::revoked_at.is_null()),
    )
    .set(refresh_tokens::revoked_at.eq(Some(Utc::now())))
    .execute(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heritage_shared::middleware::decode_access_token;

    fn user(sys_admin: bool) -> User {
        User {
            id: 12,
            email: "editor@example.com".into(),
            first_name: "Ed".into(),
            last_name: None,
            password_hash: None,
            active: true,
            sys_admin,
            deleted: false,
            avatar: None,
            role_id: Some(2),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn access_token_carries_identity() {
        let token = create_access_token(&user(true), Some("editor".into()), "s3cret", 3600).unwrap();
        let claims = decode_access_token(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, 12);
        assert_eq!(claims.role.as_deref(), Some("editor"));
        assert!(claims.sys_admin);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn refresh_tokens_are_random_hex() {
        let a = create_refresh_token();
        let b = create_refresh_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn refresh_token_is_not_a_valid_jwt() {
        assert!(decode_access_token(&create_refresh_token(), "s3cret").is_err());
    }

    #[test]
    fn hash_is_stable_sha256() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
