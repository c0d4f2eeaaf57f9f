use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

use heritage_shared::errors::{AppError, AppResult, ErrorCode};
use heritage_shared::types::pagination::{Paginated, PaginationParams};

use crate::models::{NewUser, User};
use crate::rbac;
use crate::schema::{roles, users};
use crate::search::{
    self, bool_condition, integer_condition, like_pattern, order_by_column, text_condition,
    timestamp_condition, ColumnKind, Direction, FilterOp, FilterValue, SearchQuery, Searchable,
};
use crate::services::{password_service, token_service};

type UserQuery = users::BoxedQuery<'static, Pg>;

pub struct UserSearch;

impl Searchable for UserSearch {
    type Query = UserQuery;

    fn fields() -> &'static [(&'static str, ColumnKind)] {
        &[
            ("email", ColumnKind::Text),
            ("active", ColumnKind::Boolean),
            ("role_id", ColumnKind::Integer),
            ("sys_admin", ColumnKind::Boolean),
            ("created_at", ColumnKind::Timestamp),
        ]
    }

    fn apply_filter(query: UserQuery, field: &str, op: FilterOp, value: FilterValue) -> UserQuery {
        match field {
            "email" => text_condition!(query, users::email, op, value),
            "active" => bool_condition!(query, users::active, op, value),
            "role_id" => integer_condition!(query, users::role_id, op, value),
            "sys_admin" => bool_condition!(query, users::sys_admin, op, value),
            "created_at" => timestamp_condition!(query, users::created_at, op, value),
            _ => query,
        }
    }

    fn apply_text(query: UserQuery, text: &str) -> UserQuery {
        let pattern = like_pattern(text, true, true);
        query.filter(
            users::email
                .ilike(pattern.clone())
                .or(users::first_name.ilike(pattern.clone()))
                .or(users::last_name.ilike(pattern).assume_not_null()),
        )
    }

    fn apply_dates(mut query: UserQuery, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> UserQuery {
        if let Some(from) = from {
            query = query.filter(users::created_at.ge(from));
        }
        if let Some(to) = to {
            query = query.filter(users::created_at.le(to));
        }
        query
    }

    fn apply_order(query: UserQuery, field: Option<&str>, direction: Direction) -> UserQuery {
        match field {
            Some("email") => order_by_column!(query, users::email, users::id, direction),
            Some("created_at") => order_by_column!(query, users::created_at, users::id, direction),
            _ => query.order((users::created_at.desc(), users::id.desc())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserListItem {
    #[serde(flatten)]
    pub user: User,
    pub role: Option<String>,
}

fn live_users() -> UserQuery {
    users::table.filter(users::deleted.eq(false)).into_boxed()
}

pub fn list_users(
    conn: &mut PgConnection,
    search: &SearchQuery,
    pagination: &PaginationParams,
) -> AppResult<Paginated<UserListItem>> {
    let total: i64 = search::build_query::<UserSearch>(live_users(), search)?
        .count()
        .get_result(conn)?;
    let rows: Vec<User> = search::apply_ordering::<UserSearch>(
        search::build_query::<UserSearch>(live_users(), search)?,
        search,
    )
    .offset(pagination.sql_offset())
    .limit(pagination.sql_limit())
    .load(conn)?;

    let role_names: HashMap<i32, String> = roles::table
        .select((roles::id, roles::name))
        .load::<(i32, String)>(conn)?
        .into_iter()
        .collect();
    let items = rows
        .into_iter()
        .map(|user| UserListItem {
            role: user.role_id.and_then(|id| role_names.get(&id).cloned()),
            user,
        })
        .collect();

    let mut page = Paginated::new(items, total as u64, pagination);
    if let Some(order_by) = &search.order_by {
        page = page.with_ordering(order_by.clone(), search.direction.as_str());
    }
    Ok(page)
}

pub fn with_role(conn: &mut PgConnection, user: User) -> AppResult<UserListItem> {
    let role = match user.role_id {
        Some(role_id) => roles::table
            .find(role_id)
            .select(roles::name)
            .first::<String>(conn)
            .optional()?,
        None => None,
    };
    Ok(UserListItem { user, role })
}

/// Soft-deleted users are not found.
pub fn get_user(conn: &mut PgConnection, id: i32) -> AppResult<User> {
    users::table
        .find(id)
        .filter(users::deleted.eq(false))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))
}

pub fn find_by_email(conn: &mut PgConnection, email: &str) -> AppResult<Option<User>> {
    Ok(users::table
        .filter(users::email.eq(email.trim().to_lowercase()))
        .first(conn)
        .optional()?)
}

fn ensure_role(conn: &mut PgConnection, role_id: Option<i32>) -> AppResult<()> {
    if let Some(id) = role_id {
        let exists: bool = diesel::select(diesel::dsl::exists(roles::table.find(id))).get_result(conn)?;
        if !exists {
            return Err(AppError::new(ErrorCode::RoleNotFound, "role not found"));
        }
    }
    Ok(())
}

fn none_if_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(email(message = "invalid email address"), length(max = 120))]
    pub email: String,
    #[validate(length(min = 1, max = 50, message = "first name must be 1 to 50 characters"))]
    pub first_name: String,
    #[validate(length(max = 50, message = "last name must be at most 50 characters"))]
    pub last_name: Option<String>,
    pub password: String,
    pub role_id: Option<i32>,
    #[serde(default)]
    pub sys_admin: bool,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub fn create_user(conn: &mut PgConnection, input: CreateUser) -> AppResult<User> {
    let input = CreateUser {
        email: input.email.trim().to_lowercase(),
        first_name: input.first_name.trim().to_string(),
        last_name: none_if_blank(input.last_name),
        ..input
    };
    input.validate()?;
    password_service::validate_password(&input.password)?;
    ensure_role(conn, input.role_id)?;

    if find_by_email(conn, &input.email)?.is_some() {
        return Err(AppError::new(ErrorCode::EmailAlreadyExists, "email already registered"));
    }

    let password_hash = password_service::hash_password(&input.password)?;
    let user: User = diesel::insert_into(users::table)
        .values(&NewUser {
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            password_hash: Some(password_hash),
            active: input.active,
            sys_admin: input.sys_admin,
            avatar: None,
            role_id: input.role_id,
        })
        .get_result(conn)?;

    tracing::info!(user_id = user.id, "user created");
    Ok(user)
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUser {
    #[validate(length(min = 1, max = 50, message = "first name must be 1 to 50 characters"))]
    pub first_name: Option<String>,
    #[validate(length(max = 50, message = "last name must be at most 50 characters"))]
    pub last_name: Option<String>,
    pub role_id: Option<i32>,
    pub sys_admin: Option<bool>,
}

pub fn update_user(conn: &mut PgConnection, id: i32, input: UpdateUser) -> AppResult<User> {
    let user = get_user(conn, id)?;
    let input = UpdateUser {
        first_name: input.first_name.map(|v| v.trim().to_string()),
        last_name: input.last_name.map(|v| v.trim().to_string()),
        ..input
    };
    input.validate()?;
    ensure_role(conn, input.role_id)?;

    let user: User = diesel::update(users::table.find(id))
        .set((
            users::first_name.eq(input.first_name.unwrap_or(user.first_name)),
            users::last_name.eq(match input.last_name {
                Some(last) if last.is_empty() => None,
                Some(last) => Some(last),
                None => user.last_name,
            }),
            users::role_id.eq(input.role_id.or(user.role_id)),
            users::sys_admin.eq(input.sys_admin.unwrap_or(user.sys_admin)),
            users::updated_at.eq(Utc::now()),
        ))
        .get_result(conn)?;
    Ok(user)
}

pub fn change_password(conn: &mut PgConnection, id: i32, new_password: &str) -> AppResult<()> {
    get_user(conn, id)?;
    password_service::validate_password(new_password)?;
    let hash = password_service::hash_password(new_password)?;

    conn.transaction(|conn| {
        diesel::update(users::table.find(id))
            .set((users::password_hash.eq(Some(hash)), users::updated_at.eq(Utc::now())))
            .execute(conn)?;
        token_service::revoke_all_for_user(conn, id)?;
        Ok(())
    })
}

fn protect_sys_admin(user: &User) -> AppResult<()> {
    if user.sys_admin {
        return Err(AppError::new(
            ErrorCode::CannotModifySysAdmin,
            "a system administrator cannot be deactivated or deleted",
        ));
    }
    Ok(())
}

pub fn set_active(conn: &mut PgConnection, id: i32, active: bool) -> AppResult<User> {
    let user = get_user(conn, id)?;
    if !active {
        protect_sys_admin(&user)?;
    }

    conn.transaction(|conn| {
        let user: User = diesel::update(users::table.find(id))
            .set((users::active.eq(active), users::updated_at.eq(Utc::now())))
            .get_result(conn)?;
        if !active {
            token_service::revoke_all_for_user(conn, id)?;
        }
        tracing::info!(user_id = id, active, "user activation changed");
        Ok(user)
    })
}

pub fn toggle_active(conn: &mut PgConnection, id: i32) -> AppResult<User> {
    let user = get_user(conn, id)?;
    set_active(conn, id, !user.active)
}

pub fn soft_delete_user(conn: &mut PgConnection, id: i32) -> AppResult<()> {
    let user = get_user(conn, id)?;
    protect_sys_admin(&user)?;

    conn.transaction(|conn| {
        diesel::update(users::table.find(id))
            .set((
                users::deleted.eq(true),
                users::active.eq(false),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        token_service::revoke_all_for_user(conn, id)?;
        Ok::<_, AppError>(())
    })?;
    tracing::info!(user_id = id, "user deleted");
    Ok(())
}

/// Email and password login.
pub fn authenticate(conn: &mut PgConnection, email: &str, password: &str) -> AppResult<User> {
    let invalid = || AppError::new(ErrorCode::InvalidCredentials, "invalid email or password");

    let user = find_by_email(conn, email)?
        .filter(|u| !u.deleted)
        .ok_or_else(invalid)?;
    let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
    if !password_service::verify_password(password, hash) {
        tracing::debug!(user_id = user.id, "password mismatch");
        return Err(invalid());
    }
    if !user.active {
        return Err(AppError::new(ErrorCode::AccountInactive, "account is inactive"));
    }
    Ok(user)
}

/// First word becomes the first name; the rest, or "User", the last name.
pub fn split_display_name(name: Option<&str>, email: &str) -> (String, String) {
    let mut words = name.unwrap_or_default().split_whitespace();
    let first = match words.next() {
        Some(first) => first.to_string(),
        None => email.split('@').next().unwrap_or(email).to_string(),
    };
    let rest = words.collect::<Vec<_>>().join(" ");
    let last = if rest.is_empty() { "User".to_string() } else { rest };
    (first, last)
}

pub fn find_or_create_google_user(
    conn: &mut PgConnection,
    email: &str,
    name: Option<&str>,
    avatar: Option<&str>,
) -> AppResult<User> {
    let email = email.trim().to_lowercase();
    if let Some(user) = find_by_email(conn, &email)? {
        if !user.can_log_in() {
            return Err(AppError::new(ErrorCode::AccountInactive, "account is inactive"));
        }
        return Ok(user);
    }

    let (first_name, last_name) = split_display_name(name, &email);
    let role_id = rbac::find_role_by_name(conn, rbac::ROLE_USER)?.map(|r| r.id);

    let user: User = diesel::insert_into(users::table)
        .values(&NewUser {
            email,
            first_name,
            last_name: Some(last_name),
            password_hash: None,
            active: true,
            sys_admin: false,
            avatar: avatar.map(str::to_string),
            role_id,
        })
        .get_result(conn)?;
    tracing::info!(user_id = user.id, "user created from google sign-in");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;

    #[test]
    fn deleted_users_are_never_listed() {
        let sql = debug_query::<Pg, _>(&live_users()).to_string();
        assert!(sql.contains(r#""users"."deleted" = $1"#));
        assert!(sql.ends_with("-- binds: [false]"));

        let search = SearchQuery::from_params([("email", "ana"), ("created_at__ge", "2024-01-01")]);
        let query = search::build_query::<UserSearch>(live_users(), &search).unwrap();
        let sql = debug_query::<Pg, _>(&query).to_string();
        assert!(sql.contains(r#""users"."deleted" = $1"#));
        assert!(sql.contains(r#""users"."email" ILIKE $2"#));
        assert!(sql.contains(r#""users"."created_at" >= $3"#));
    }

    #[test]
    fn display_name_is_split_on_first_word() {
        assert_eq!(
            split_display_name(Some("Ana María López"), "ana@example.com"),
            ("Ana".to_string(), "María López".to_string())
        );
        assert_eq!(
            split_display_name(Some("Cher"), "cher@example.com"),
            ("Cher".to_string(), "User".to_string())
        );
        assert_eq!(
            split_display_name(None, "nobody@example.com"),
            ("nobody".to_string(), "User".to_string())
        );
    }

    #[test]
    fn create_user_validation_rejects_bad_email() {
        let input = CreateUser {
            email: "not-an-email".into(),
            first_name: "Ana".into(),
            last_name: None,
            password: "secret123".into(),
            role_id: None,
            sys_admin: false,
            active: true,
        };
        assert!(input.validate().is_err());

        let ok = CreateUser { email: "ana@example.com".into(), ..input };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn update_user_checks_name_length() {
        let input = UpdateUser { first_name: Some(String::new()), ..Default::default() };
        assert!(input.validate().is_err());
        assert!(UpdateUser::default().validate().is_ok());
    }
}
