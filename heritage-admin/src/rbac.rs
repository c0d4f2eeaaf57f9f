use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Nullable};

use heritage_shared::errors::{AppError, AppResult};
use heritage_shared::types::auth::AuthUser;

use crate::models::{Permission, Role};
use crate::schema::{permissions, role_permissions, roles, users};

pub mod perm {
    pub const USER_INDEX: &str = "user_index";
    pub const USER_SHOW: &str = "user_show";
    pub const USER_NEW: &str = "user_new";
    pub const USER_UPDATE: &str = "user_update";
    pub const USER_DESTROY: &str = "user_destroy";
    pub const USER_DEACTIVATE: &str = "user_deactivate";

    pub const SITE_INDEX: &str = "site_index";
    pub const SITE_SHOW: &str = "site_show";
    pub const SITE_NEW: &str = "site_new";
    pub const SITE_UPDATE: &str = "site_update";
    pub const SITE_DESTROY: &str = "site_destroy";
    pub const SITE_RESTORE: &str = "site_restore";
    pub const SITE_HISTORY: &str = "site_history";
    pub const SITE_EXPORT: &str = "site_export";

    pub const TAG_INDEX: &str = "tag_index";
    pub const TAG_SHOW: &str = "tag_show";
    pub const TAG_NEW: &str = "tag_new";
    pub const TAG_UPDATE: &str = "tag_update";
    pub const TAG_DESTROY: &str = "tag_destroy";

    pub const CATEGORY_INDEX: &str = "category_index";
    pub const CATEGORY_MANAGE: &str = "category_manage";

    pub const REVIEW_INDEX: &str = "review_index";
    pub const REVIEW_SHOW: &str = "review_show";
    pub const REVIEW_MODERATE: &str = "review_moderate";
    pub const REVIEW_DESTROY: &str = "review_destroy";

    pub const ALL: &[&str] = &[
        USER_INDEX, USER_SHOW, USER_NEW, USER_UPDATE, USER_DESTROY, USER_DEACTIVATE,
        SITE_INDEX, SITE_SHOW, SITE_NEW, SITE_UPDATE, SITE_DESTROY, SITE_RESTORE, SITE_HISTORY,
        SITE_EXPORT, TAG_INDEX, TAG_SHOW, TAG_NEW, TAG_UPDATE, TAG_DESTROY, CATEGORY_INDEX,
        CATEGORY_MANAGE, REVIEW_INDEX, REVIEW_SHOW, REVIEW_MODERATE, REVIEW_DESTROY,
    ];
}

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EDITOR: &str = "editor";
pub const ROLE_MODERATOR: &str = "moderator";
pub const ROLE_USER: &str = "user";

/// Seeded role to permission matrix.
pub fn default_matrix() -> Vec<(&'static str, Vec<&'static str>)> {
    use perm::*;
    vec![
        (ROLE_ADMIN, ALL.to_vec()),
        (
            ROLE_EDITOR,
            vec![
                SITE_INDEX, SITE_SHOW, SITE_UPDATE, SITE_NEW, TAG_INDEX, TAG_SHOW, TAG_NEW,
                TAG_UPDATE, TAG_DESTROY, CATEGORY_INDEX,
            ],
        ),
        (
            ROLE_MODERATOR,
            vec![REVIEW_INDEX, REVIEW_SHOW, REVIEW_MODERATE, REVIEW_DESTROY, SITE_INDEX, SITE_SHOW],
        ),
        (ROLE_USER, vec![SITE_INDEX]),
    ]
}

/// Role of an active, non-deleted account.
fn live_account_role(user_id: i32) -> users::BoxedQuery<'static, Pg, Nullable<Integer>> {
    users::table
        .filter(users::id.eq(user_id))
        .filter(users::active.eq(true))
        .filter(users::deleted.eq(false))
        .select(users::role_id)
        .into_boxed()
}

fn role_grants(role_id: i32, permission: &str) -> role_permissions::BoxedQuery<'static, Pg, Integer> {
    role_permissions::table
        .filter(role_permissions::role_id.eq(role_id))
        .filter(
            role_permissions::permission_id.eq_any(
                permissions::table
                    .filter(permissions::name.eq(permission.to_string()))
                    .select(permissions::id),
            ),
        )
        .select(role_permissions::id)
        .into_boxed()
}

/// System administrators pass every check.
pub fn has_permission(conn: &mut PgConnection, user: &AuthUser, permission: &str) -> AppResult<bool> {
    if user.sys_admin {
        return Ok(true);
    }

    let role_id = live_account_role(user.id)
        .first::<Option<i32>>(conn)
        .optional()?
        .flatten();
    let Some(role_id) = role_id else {
        return Ok(false);
    };

    let granted = diesel::select(diesel::dsl::exists(role_grants(role_id, permission))).get_result::<bool>(conn)?;
    Ok(granted)
}

pub fn require_permission(conn: &mut PgConnection, user: &AuthUser, permission: &str) -> AppResult<()> {
    if has_permission(conn, user, permission)? {
        Ok(())
    } else {
        tracing::debug!(user_id = user.id, permission, "permission denied");
        Err(AppError::forbidden(format!("missing permission: {permission}")))
    }
}

pub fn require_sys_admin(user: &AuthUser) -> AppResult<()> {
    if user.sys_admin {
        Ok(())
    } else {
        Err(AppError::forbidden("system administrator access required"))
    }
}

pub fn list_roles(conn: &mut PgConnection) -> AppResult<Vec<Role>> {
    Ok(roles::table.order(roles::name.asc()).load(conn)?)
}

pub fn find_role_by_name(conn: &mut PgConnection, name: &str) -> AppResult<Option<Role>> {
    Ok(roles::table
        .filter(roles::name.eq(name))
        .first(conn)
        .optional()?)
}

pub fn role_permissions(conn: &mut PgConnection, role_id: i32) -> AppResult<Vec<Permission>> {
    Ok(permissions::table
        .inner_join(role_permissions::table)
        .filter(role_permissions::role_id.eq(role_id))
        .select((permissions::id, permissions::name))
        .order(permissions::name.asc())
        .load(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;

    fn grants(role: &str, permission: &str) -> bool {
        default_matrix()
            .into_iter()
            .find(|(name, _)| *name == role)
            .map(|(_, perms)| perms.contains(&permission))
            .unwrap_or(false)
    }

    #[test]
    fn matrix_only_uses_known_permissions() {
        for (_, perms) in default_matrix() {
            assert!(perms.iter().all(|p| perm::ALL.contains(p)));
        }
    }

    #[test]
    fn editor_cannot_destroy_sites_or_manage_users() {
        assert!(grants(ROLE_EDITOR, perm::SITE_UPDATE));
        assert!(!grants(ROLE_EDITOR, perm::SITE_DESTROY));
        assert!(!grants(ROLE_EDITOR, perm::USER_INDEX));
    }

    #[test]
    fn moderator_moderates_reviews_only() {
        assert!(grants(ROLE_MODERATOR, perm::REVIEW_MODERATE));
        assert!(!grants(ROLE_MODERATOR, perm::SITE_UPDATE));
    }

    #[test]
    fn plain_user_only_lists_sites() {
        assert!(grants(ROLE_USER, perm::SITE_INDEX));
        assert!(!grants(ROLE_USER, perm::SITE_SHOW));
    }

    #[test]
    fn sys_admin_flag_is_required_for_flags() {
        let user = AuthUser { id: 1, email: "a@b.c".into(), role: Some("admin".into()), sys_admin: false };
        assert!(require_sys_admin(&user).is_err());
    }

    #[test]
    fn blocked_and_deleted_accounts_hold_no_role() {
        let sql = debug_query::<Pg, _>(&live_account_role(7)).to_string();
        assert!(sql.contains(r#""users"."id" = $1"#));
        assert!(sql.contains(r#""users"."active" = $2"#));
        assert!(sql.contains(r#""users"."deleted" = $3"#));
        assert!(sql.ends_with("-- binds: [7, true, false]"));
    }

    #[test]
    fn grants_are_looked_up_by_role_and_permission_name() {
        let sql = debug_query::<Pg, _>(&role_grants(3, perm::REVIEW_MODERATE)).to_string();
        assert!(sql.contains(r#""role_permissions"."role_id" = $1"#));
        assert!(sql.contains(r#""permissions"."name" = $2"#));
        assert!(sql.ends_with(r#"-- binds: [3, "review_moderate"]"#));
    }
}
