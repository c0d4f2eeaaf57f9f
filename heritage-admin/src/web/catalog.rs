use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::Form;
use maud::{html, Markup};
use serde::Deserialize;

use heritage_shared::types::auth::AuthUser;
use heritage_shared::types::pagination::Paginated;

use super::{flash_success, layout, take_flash, BackTo, Flash, WebResult, WebUser};
use crate::models::{Category, Tag};
use crate::rbac::perm;
use crate::routes::{ListParams, ADMIN_PER_PAGE};
use crate::services::{catalog_service, tag_service};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tags", get(tags_index).post(create_tag))
        .route("/tags/new", get(new_tag))
        .route("/tags/:id", get(show_tag).post(update_tag))
        .route("/tags/:id/edit", get(edit_tag))
        .route("/tags/:id/delete", post(delete_tag))
        .route("/categories", get(categories_index).post(create_category))
        .route("/categories/:id", post(rename_category))
        .route("/categories/:id/delete", post(delete_category))
}

#[derive(Debug, Deserialize)]
pub struct NameForm {
    pub name: String,
}

// --- Tags ---

fn tags_view(
    user: &AuthUser,
    flash: Option<&Flash>,
    params: &ListParams,
    pairs: &[(String, String)],
    page: &Paginated<Tag>,
) -> Markup {
    layout::page(
        "Tags",
        user,
        flash,
        html! {
            div class="actions" {
                a class="button" href="/tags/new" { "New tag" }
            }
            form class="filters" action="/tags" method="GET" {
                input type="search" name="q" placeholder="Name" value=(params.get("q").unwrap_or_default());
                select name="order_by" {
                    option value="name" selected[params.get("order_by") != Some("created_at")] { "Name" }
                    option value="created_at" selected[params.get("order_by") == Some("created_at")] { "Created" }
                }
                select name="sorted_by" {
                    option value="asc" selected[params.get("sorted_by") != Some("desc")] { "Ascending" }
                    option value="desc" selected[params.get("sorted_by") == Some("desc")] { "Descending" }
                }
                button type="submit" { "Filter" }
            }
            table {
                thead { tr { th { "Name" } th { "Slug" } th { "Created" } th {} } }
                tbody {
                    @for tag in &page.items {
                        tr {
                            td { a href=(format!("/tags/{}", tag.id)) { (tag.name) } }
                            td { code { (tag.slug) } }
                            td { (layout::timestamp(&tag.created_at)) }
                            td { a href=(format!("/tags/{}/edit", tag.id)) { "Edit" } }
                        }
                    }
                }
            }
            (layout::pagination_nav("/tags", pairs, page))
        },
    )
}

fn tag_form_view(user: &AuthUser, flash: Option<&Flash>, tag: Option<&Tag>) -> Markup {
    let (title, action) = match tag {
        Some(tag) => (format!("Edit {}", tag.name), format!("/tags/{}", tag.id)),
        None => ("New tag".to_string(), "/tags".to_string()),
    };
    layout::page(
        &title,
        user,
        flash,
        html! {
            form action=(action) method="POST" {
                label {
                    "Name"
                    input type="text" name="name" minlength=(tag_service::TAG_NAME_MIN) maxlength=(tag_service::TAG_NAME_MAX)
                        required value=(tag.map(|t| t.name.as_str()).unwrap_or_default());
                }
                button type="submit" { "Save" }
            }
        },
    )
}

pub async fn tags_index(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(pairs): Query<Vec<(String, String)>>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::TAG_INDEX)?;
    let params = ListParams::new(pairs.clone(), ADMIN_PER_PAGE);
    let page = tag_service::list_tags(&mut conn, &params.search(), &params.pagination)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, tags_view(&user.0, flash.as_ref(), &params, &pairs, &page)))
}

pub async fn new_tag(user: WebUser, State(state): State<Arc<AppState>>, jar: CookieJar) -> WebResult<(CookieJar, Markup)> {
    drop(user.authorize(&state, perm::TAG_NEW)?);
    let (jar, flash) = take_flash(jar);
    Ok((jar, tag_form_view(&user.0, flash.as_ref(), None)))
}

pub async fn create_tag(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<NameForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::TAG_NEW)?;
    let tag = tag_service::create_tag(&mut conn, &form.name).back_to("/tags/new")?;
    Ok((flash_success(jar, format!("Tag {} created.", tag.name)), Redirect::to("/tags")))
}

pub async fn show_tag(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::TAG_SHOW)?;
    let tag = tag_service::get_tag(&mut conn, id)?;
    let usage = tag_service::usage_count(&mut conn, id)?;
    let (jar, flash) = take_flash(jar);
    let html = layout::page(
        &tag.name,
        &user.0,
        flash.as_ref(),
        html! {
            dl {
                dt { "Slug" } dd { code { (tag.slug) } }
                dt { "Created" } dd { (layout::timestamp(&tag.created_at)) }
                dt { "Sites" } dd { a href=(format!("/sites?tags={}", tag.id)) { (usage) } }
            }
            div class="actions" {
                a class="button" href=(format!("/tags/{}/edit", tag.id)) { "Edit" }
                @if usage == 0 {
                    form action=(format!("/tags/{}/delete", tag.id)) method="POST" {
                        button type="submit" class="danger" { "Delete" }
                    }
                }
            }
        },
    );
    Ok((jar, html))
}

pub async fn edit_tag(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::TAG_UPDATE)?;
    let tag = tag_service::get_tag(&mut conn, id)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, tag_form_view(&user.0, flash.as_ref(), Some(&tag))))
}

pub async fn update_tag(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Form(form): Form<NameForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::TAG_UPDATE)?;
    tag_service::update_tag(&mut conn, id, &form.name).back_to(format!("/tags/{id}/edit"))?;
    Ok((flash_success(jar, "Tag updated."), Redirect::to("/tags")))
}

pub async fn delete_tag(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::TAG_DESTROY)?;
    tag_service::delete_tag(&mut conn, id).back_to("/tags")?;
    Ok((flash_success(jar, "Tag deleted."), Redirect::to("/tags")))
}

// --- Categories ---

fn categories_view(user: &AuthUser, flash: Option<&Flash>, categories: &[Category]) -> Markup {
    layout::page(
        "Categories",
        user,
        flash,
        html! {
            form class="inline" action="/categories" method="POST" {
                input type="text" name="name" maxlength=(catalog_service::CATEGORY_NAME_MAX) placeholder="New category" required;
                button type="submit" { "Add" }
            }
            table {
                thead { tr { th { "Name" } th {} } }
                tbody {
                    @for category in categories {
                        tr {
                            td {
                                form class="inline" action=(format!("/categories/{}", category.id)) method="POST" {
                                    input type="text" name="name" maxlength=(catalog_service::CATEGORY_NAME_MAX) required value=(category.name);
                                    button type="submit" { "Rename" }
                                }
                            }
                            td {
                                form action=(format!("/categories/{}/delete", category.id)) method="POST" {
                                    button type="submit" class="danger" { "Delete" }
                                }
                            }
                        }
                    }
                }
            }
        },
    )
}

pub async fn categories_index(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::CATEGORY_INDEX)?;
    let categories = catalog_service::list_categories(&mut conn)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, categories_view(&user.0, flash.as_ref(), &categories)))
}

pub async fn create_category(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<NameForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::CATEGORY_MANAGE)?;
    let category = catalog_service::create_category(&mut conn, &form.name).back_to("/categories")?;
    Ok((flash_success(jar, format!("Category {} created.", category.name)), Redirect::to("/categories")))
}

pub async fn rename_category(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Form(form): Form<NameForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::CATEGORY_MANAGE)?;
    catalog_service::rename_category(&mut conn, id, &form.name).back_to("/categories")?;
    Ok((flash_success(jar, "Category renamed."), Redirect::to("/categories")))
}

pub async fn delete_category(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::CATEGORY_MANAGE)?;
    catalog_service::delete_category(&mut conn, id).back_to("/categories")?;
    Ok((flash_success(jar, "Category deleted."), Redirect::to("/categories")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn editor() -> AuthUser {
        AuthUser { id: 2, email: "editor@example.com".into(), role: Some("editor".into()), sys_admin: false }
    }

    #[test]
    fn tag_form_prefills_the_name() {
        let tag = Tag { id: 4, name: "Colonial".into(), slug: "colonial".into(), created_at: Utc::now() };
        let html = tag_form_view(&editor(), None, Some(&tag)).into_string();
        assert!(html.contains(r#"action="/tags/4""#));
        assert!(html.contains(r#"value="Colonial""#));
    }

    #[test]
    fn non_admins_do_not_see_flags_link() {
        let html = categories_view(&editor(), None, &[]).into_string();
        assert!(!html.contains(r#"href="/flags""#));
        assert!(html.contains(r#"action="/categories""#));
    }
}
