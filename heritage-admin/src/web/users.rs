use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::Form;
use maud::{html, Markup};
use serde::Deserialize;

use heritage_shared::errors::{AppError, AppResult};
use heritage_shared::types::auth::AuthUser;
use heritage_shared::types::pagination::Paginated;

use super::{flash_success, layout, optional_number, take_flash, BackTo, Flash, WebResult, WebUser};
use crate::models::Role;
use crate::rbac::{self, perm};
use crate::routes::admin::check_sys_admin_grant;
use crate::routes::{ListParams, ADMIN_PER_PAGE};
use crate::services::user_service::{self, CreateUser, UpdateUser, UserListItem};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index).post(create))
        .route("/new", get(new_form))
        .route("/:id", get(edit_form).post(update))
        .route("/:id/password", post(change_password))
        .route("/:id/toggle-active", post(toggle_active))
        .route("/:id/delete", post(delete))
}

fn role_name<'a>(roles: &'a [Role], id: Option<i32>) -> &'a str {
    id.and_then(|id| roles.iter().find(|r| r.id == id))
        .map(|r| r.name.as_str())
        .unwrap_or("none")
}

fn list_view(
    user: &AuthUser,
    flash: Option<&Flash>,
    params: &ListParams,
    pairs: &[(String, String)],
    roles: &[Role],
    page: &Paginated<UserListItem>,
) -> Markup {
    let selected_role = params.get("role_id").and_then(|v| v.parse::<i32>().ok());
    layout::page(
        "Users",
        user,
        flash,
        html! {
            div class="actions" {
                a class="button" href="/users/new" { "New user" }
            }
            form class="filters" action="/users" method="GET" {
                input type="search" name="email" placeholder="Email" value=(params.get("email").unwrap_or_default());
                select name="active" {
                    option value="" { "Any status" }
                    option value="true" selected[params.get("active") == Some("true")] { "Active" }
                    option value="false" selected[params.get("active") == Some("false")] { "Blocked" }
                }
                select name="role_id" {
                    option value="" { "Any role" }
                    (layout::options(roles.iter().map(|r| (r.id, r.name.as_str())), selected_role))
                }
                select name="order_by" {
                    option value="created_at" selected[params.get("order_by") != Some("email")] { "Created" }
                    option value="email" selected[params.get("order_by") == Some("email")] { "Email" }
                }
                select name="sorted_by" {
                    option value="desc" selected[params.get("sorted_by") != Some("asc")] { "Descending" }
                    option value="asc" selected[params.get("sorted_by") == Some("asc")] { "Ascending" }
                }
                button type="submit" { "Filter" }
            }
            table class="users" {
                thead { tr { th { "Email" } th { "Name" } th { "Role" } th { "Active" } th { "Created" } th {} } }
                tbody {
                    @for item in &page.items {
                        tr {
                            td {
                                (item.user.email)
                                @if item.user.sys_admin { " " span class="badge" { "sys admin" } }
                            }
                            td { (item.user.first_name) " " (item.user.last_name.as_deref().unwrap_or_default()) }
                            td { (item.role.as_deref().unwrap_or("none")) }
                            td { (layout::yes_no(item.user.active)) }
                            td { (layout::timestamp(&item.user.created_at)) }
                            td { a href=(format!("/users/{}", item.user.id)) { "Edit" } }
                        }
                    }
                }
            }
            (layout::pagination_nav("/users", pairs, page))
        },
    )
}

fn new_view(user: &AuthUser, flash: Option<&Flash>, roles: &[Role]) -> Markup {
    layout::page(
        "New user",
        user,
        flash,
        html! {
            form action="/users" method="POST" {
                label { "Email" input type="email" name="email" maxlength="120" required; }
                label { "First name" input type="text" name="first_name" maxlength="50" required; }
                label { "Last name" input type="text" name="last_name" maxlength="50"; }
                label { "Password" input type="password" name="password" minlength="8" required; }
                label {
                    "Role"
                    select name="role_id" {
                        option value="" { "No role" }
                        (layout::options(roles.iter().map(|r| (r.id, r.name.as_str())), None))
                    }
                }
                label { input type="checkbox" name="active" value="true" checked; "Active" }
                @if user.sys_admin {
                    label { input type="checkbox" name="sys_admin" value="true"; "System administrator" }
                }
                button type="submit" { "Create" }
            }
        },
    )
}

fn edit_view(user: &AuthUser, flash: Option<&Flash>, roles: &[Role], item: &UserListItem) -> Markup {
    let account = &item.user;
    let base = format!("/users/{}", account.id);
    layout::page(
        &account.email,
        user,
        flash,
        html! {
            form action=(base) method="POST" {
                label { "First name" input type="text" name="first_name" maxlength="50" required value=(account.first_name); }
                label { "Last name" input type="text" name="last_name" maxlength="50" value=(account.last_name.as_deref().unwrap_or_default()); }
                label {
                    "Role"
                    select name="role_id" {
                        option value="" { "Keep " (role_name(roles, account.role_id)) }
                        (layout::options(roles.iter().map(|r| (r.id, r.name.as_str())), account.role_id))
                    }
                }
                @if user.sys_admin {
                    label { input type="checkbox" name="sys_admin" value="true" checked[account.sys_admin]; "System administrator" }
                }
                button type="submit" { "Save" }
            }
            form action=(format!("{base}/password")) method="POST" {
                label { "New password" input type="password" name="password" minlength="8" required; }
                button type="submit" { "Change password" }
            }
            @if !account.sys_admin {
                div class="actions" {
                    form action=(format!("{base}/toggle-active")) method="POST" {
                        button type="submit" { (if account.active { "Block" } else { "Activate" }) }
                    }
                    @if account.id != user.id {
                        form action=(format!("{base}/delete")) method="POST" {
                            button type="submit" class="danger" { "Delete" }
                        }
                    }
                }
            }
        },
    )
}

// --- GET /users ---

pub async fn index(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(pairs): Query<Vec<(String, String)>>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::USER_INDEX)?;
    let params = ListParams::new(pairs.clone(), ADMIN_PER_PAGE);
    let page = user_service::list_users(&mut conn, &params.search(), &params.pagination)?;
    let roles = rbac::list_roles(&mut conn)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, list_view(&user.0, flash.as_ref(), &params, &pairs, &roles, &page)))
}

// --- GET /users/new, POST /users ---

#[derive(Debug, Deserialize)]
pub struct NewUserForm {
    pub email: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub password: String,
    #[serde(default)]
    pub role_id: String,
    pub active: Option<String>,
    pub sys_admin: Option<String>,
}

impl NewUserForm {
    fn into_input(self) -> AppResult<CreateUser> {
        Ok(CreateUser {
            role_id: optional_number(&self.role_id, "role")?,
            active: self.active.is_some(),
            sys_admin: self.sys_admin.is_some(),
            email: self.email,
            first_name: self.first_name,
            last_name: Some(self.last_name),
            password: self.password,
        })
    }
}

pub async fn new_form(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::USER_NEW)?;
    let roles = rbac::list_roles(&mut conn)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, new_view(&user.0, flash.as_ref(), &roles)))
}

pub async fn create(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<NewUserForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let input = form.into_input().back_to("/users/new")?;
    check_sys_admin_grant(&user.0, input.sys_admin).back_to("/users/new")?;
    let mut conn = user.authorize(&state, perm::USER_NEW)?;
    let created = user_service::create_user(&mut conn, input).back_to("/users/new")?;
    Ok((flash_success(jar, format!("User {} created.", created.email)), Redirect::to("/users")))
}

// --- GET /users/:id, POST /users/:id ---

pub async fn edit_form(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::USER_SHOW)?;
    let account = user_service::get_user(&mut conn, id)?;
    let item = user_service::with_role(&mut conn, account)?;
    let roles = rbac::list_roles(&mut conn)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, edit_view(&user.0, flash.as_ref(), &roles, &item)))
}

#[derive(Debug, Deserialize)]
pub struct EditUserForm {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role_id: String,
    pub sys_admin: Option<String>,
}

impl EditUserForm {
    /// The system administrator checkbox only reaches the form of a system
    /// administrator, so it is ignored for everybody else.
    fn into_input(self, editor: &AuthUser) -> AppResult<UpdateUser> {
        Ok(UpdateUser {
            first_name: Some(self.first_name),
            last_name: Some(self.last_name),
            role_id: optional_number(&self.role_id, "role")?,
            sys_admin: editor.sys_admin.then_some(self.sys_admin.is_some()),
        })
    }
}

pub async fn update(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Form(form): Form<EditUserForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let back = format!("/users/{id}");
    let mut conn = user.authorize(&state, perm::USER_UPDATE)?;
    let input = form.into_input(&user.0).back_to(&back)?;
    user_service::update_user(&mut conn, id, input).back_to(&back)?;
    Ok((flash_success(jar, "User updated."), Redirect::to(&back)))
}

// --- POST /users/:id/password ---

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    pub password: String,
}

pub async fn change_password(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Form(form): Form<PasswordForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let back = format!("/users/{id}");
    let mut conn = if user.0.id == id {
        state.db.get()?
    } else {
        user.authorize(&state, perm::USER_UPDATE)?
    };
    user_service::change_password(&mut conn, id, &form.password).back_to(&back)?;
    Ok((flash_success(jar, "Password changed."), Redirect::to(&back)))
}

// --- POST /users/:id/toggle-active, POST /users/:id/delete ---

pub async fn toggle_active(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Redirect)> {
    let back = format!("/users/{id}");
    let mut conn = user.authorize(&state, perm::USER_DEACTIVATE)?;
    let account = user_service::toggle_active(&mut conn, id).back_to(&back)?;
    let message = if account.active { "User activated." } else { "User blocked." };
    Ok((flash_success(jar, message), Redirect::to(&back)))
}

pub async fn delete(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Redirect)> {
    let back = format!("/users/{id}");
    let mut conn = user.authorize(&state, perm::USER_DESTROY)?;
    if user.0.id == id {
        return Err(AppError::bad_request("you cannot delete your own account")).back_to(&back);
    }
    user_service::soft_delete_user(&mut conn, id).back_to(&back)?;
    Ok((flash_success(jar, "User deleted."), Redirect::to("/users")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use chrono::Utc;

    fn editor(sys_admin: bool) -> AuthUser {
        AuthUser { id: 1, email: "editor@example.com".into(), role: Some("admin".into()), sys_admin }
    }

    fn account(sys_admin: bool) -> UserListItem {
        let now = Utc::now();
        UserListItem {
            user: User {
                id: 8,
                email: "ana@example.com".into(),
                first_name: "Ana".into(),
                last_name: None,
                password_hash: None,
                active: true,
                sys_admin,
                deleted: false,
                avatar: None,
                role_id: Some(2),
                created_at: now,
                updated_at: now,
            },
            role: Some("editor".into()),
        }
    }

    fn roles() -> Vec<Role> {
        vec![Role { id: 2, name: "editor".into() }]
    }

    #[test]
    fn sys_admin_checkbox_is_ignored_for_regular_editors() {
        let form = EditUserForm {
            first_name: "Ana".into(),
            last_name: String::new(),
            role_id: "".into(),
            sys_admin: Some("true".into()),
        };
        let input = form.into_input(&editor(false)).unwrap();
        assert_eq!(input.sys_admin, None);
        assert_eq!(input.role_id, None);
    }

    #[test]
    fn new_user_checkboxes_map_to_flags() {
        let form = NewUserForm {
            email: "new@example.com".into(),
            first_name: "New".into(),
            last_name: String::new(),
            password: "secret123".into(),
            role_id: "2".into(),
            active: Some("true".into()),
            sys_admin: None,
        };
        let input = form.into_input().unwrap();
        assert!(input.active);
        assert!(!input.sys_admin);
        assert_eq!(input.role_id, Some(2));
    }

    #[test]
    fn system_administrators_cannot_be_blocked_from_the_page() {
        let html = edit_view(&editor(true), None, &roles(), &account(true)).into_string();
        assert!(!html.contains("toggle-active"));
        let html = edit_view(&editor(true), None, &roles(), &account(false)).into_string();
        assert!(html.contains("/users/8/toggle-active"));
        assert!(html.contains("/users/8/delete"));
    }

    #[test]
    fn role_label_falls_back_to_none() {
        assert_eq!(role_name(&roles(), Some(2)), "editor");
        assert_eq!(role_name(&roles(), Some(99)), "none");
        assert_eq!(role_name(&roles(), None), "none");
    }
}
