use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::{
    audits, categories, flags, permissions, refresh_tokens, review_audits, reviews, roles,
    site_images, site_tags, sites, states, tags, user_favorites, users,
};

// --- Roles and permissions ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = roles)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = permissions)]
pub struct Permission {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::role_permissions)]
pub struct NewRolePermission {
    pub role_id: i32,
    pub permission_id: i32,
}

// --- User ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub active: bool,
    pub sys_admin: bool,
    pub deleted: bool,
    pub avatar: Option<String>,
    pub role_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    pub fn can_log_in(&self) -> bool {
        self.active && !self.deleted
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub password_hash: Option<String>,
    pub active: bool,
    pub sys_admin: bool,
    pub avatar: Option<String>,
    pub role_id: Option<i32>,
}

#[derive(Debug, Queryable, Identifiable)]
#[diesel(table_name = refresh_tokens)]
pub struct RefreshToken {
    pub id: i32,
    pub user_id: i32,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub user_id: i32,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

// --- Catalog ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = categories)]
pub struct Category {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = states)]
pub struct State {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = sites)]
pub struct Site {
    pub id: i32,
    pub site_name: String,
    pub short_desc: String,
    pub full_desc: String,
    pub city: String,
    pub province: String,
    pub opening_year: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category_id: i32,
    pub state_id: i32,
    pub active: bool,
    pub deleted: bool,
    pub views: i32,
    pub registration: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sites)]
pub struct NewSite {
    pub site_name: String,
    pub short_desc: String,
    pub full_desc: String,
    pub city: String,
    pub province: String,
    pub opening_year: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category_id: i32,
    pub state_id: i32,
    pub active: bool,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = sites, treat_none_as_null = true)]
pub struct SiteChanges {
    pub site_name: String,
    pub short_desc: String,
    pub full_desc: String,
    pub city: String,
    pub province: String,
    pub opening_year: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category_id: i32,
    pub state_id: i32,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = tags)]
pub struct Tag {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tags)]
pub struct NewTag {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = site_tags)]
pub struct NewSiteTag {
    pub site_id: i32,
    pub tag_id: i32,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = site_images)]
pub struct SiteImage {
    pub id: i32,
    pub site_id: i32,
    pub public_url: String,
    pub file_path: String,
    pub title_alt: String,
    pub description: Option<String>,
    pub order_index: i32,
    pub is_cover: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = site_images)]
pub struct NewSiteImage {
    pub site_id: i32,
    pub public_url: String,
    pub file_path: String,
    pub title_alt: String,
    pub description: Option<String>,
    pub order_index: i32,
    pub is_cover: bool,
}

// --- Audit trail ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = audits)]
pub struct Audit {
    pub id: i32,
    pub site_id: i32,
    pub user_id: i32,
    pub action_type: String,
    pub description: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audits)]
pub struct NewAudit {
    pub site_id: i32,
    pub user_id: i32,
    pub action_type: String,
    pub description: String,
    pub details: Option<serde_json::Value>,
}

// --- Reviews ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = reviews)]
pub struct Review {
    pub id: i32,
    pub site_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub content: String,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reviews)]
pub struct NewReview {
    pub site_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub content: String,
    pub status: String,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = review_audits)]
pub struct ReviewAudit {
    pub id: i32,
    pub review_id: Option<i32>,
    pub user_id: i32,
    pub action_type: String,
    pub description: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = review_audits)]
pub struct NewReviewAudit {
    pub review_id: Option<i32>,
    pub user_id: i32,
    pub action_type: String,
    pub description: String,
    pub details: Option<serde_json::Value>,
}

// --- Flags ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = flags)]
pub struct Flag {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub is_enabled: bool,
    pub message: Option<String>,
    pub user_id: Option<i32>,
    pub last_edit: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = flags)]
pub struct NewFlag {
    pub name: String,
    pub description: String,
    pub is_enabled: bool,
    pub message: Option<String>,
    pub user_id: Option<i32>,
}

// --- Favorites ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = user_favorites)]
pub struct UserFavorite {
    pub id: i32,
    pub user_id: i32,
    pub site_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_favorites)]
pub struct NewUserFavorite {
    pub user_id: i32,
    pub site_id: i32,
}
