use diesel::prelude::*;

use heritage_shared::errors::{AppError, AppResult, ErrorCode};

use crate::models::{Category, State};
use crate::schema::{categories, sites, states};
use crate::search::like_pattern;

pub const CATEGORY_NAME_MAX: usize = 120;

pub fn normalize_category_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > CATEGORY_NAME_MAX {
        return Err(AppError::validation(format!(
            "category name must be between 1 and {CATEGORY_NAME_MAX} characters"
        )));
    }
    Ok(name.to_string())
}

pub fn list_categories(conn: &mut PgConnection) -> AppResult<Vec<Category>> {
    Ok(categories::table.order(categories::name.asc()).load(conn)?)
}

pub fn get_category(conn: &mut PgConnection, id: i32) -> AppResult<Category> {
    categories::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::CategoryNotFound, "category not found"))
}

fn ensure_name_free(conn: &mut PgConnection, name: &str, except: Option<i32>) -> AppResult<()> {
    let mut query = categories::table
        .filter(categories::name.ilike(like_pattern(name, false, false)))
        .select(categories::id)
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(categories::id.ne(id));
    }
    if query.first::<i32>(conn).optional()?.is_some() {
        return Err(AppError::new(ErrorCode::CategoryNameTaken, "a category with this name already exists"));
    }
    Ok(())
}

pub fn create_category(conn: &mut PgConnection, name: &str) -> AppResult<Category> {
    let name = normalize_category_name(name)?;
    ensure_name_free(conn, &name, None)?;

    let category = diesel::insert_into(categories::table)
        .values(categories::name.eq(&name))
        .get_result::<Category>(conn)?;
    tracing::info!(category_id = category.id, name = %category.name, "category created");
    Ok(category)
}

pub fn rename_category(conn: &mut PgConnection, id: i32, name: &str) -> AppResult<Category> {
    let name = normalize_category_name(name)?;
    get_category(conn, id)?;
    ensure_name_free(conn, &name, Some(id))?;

    Ok(diesel::update(categories::table.find(id))
        .set(categories::name.eq(&name))
        .get_result(conn)?)
}

/// Refused while any site, deleted or not, still references the category.
pub fn delete_category(conn: &mut PgConnection, id: i32) -> AppResult<()> {
    get_category(conn, id)?;

    let in_use: i64 = sites::table
        .filter(sites::category_id.eq(id))
        .count()
        .get_result(conn)?;
    if in_use > 0 {
        return Err(AppError::with_details(
            ErrorCode::CategoryInUse,
            "category is assigned to sites",
            serde_json::json!({ "sites": in_use }),
        ));
    }

    diesel::delete(categories::table.find(id)).execute(conn)?;
    tracing::info!(category_id = id, "category deleted");
    Ok(())
}

pub fn list_states(conn: &mut PgConnection) -> AppResult<Vec<State>> {
    Ok(states::table.order(states::id.asc()).load(conn)?)
}

pub fn get_state(conn: &mut PgConnection, id: i32) -> AppResult<State> {
    states::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::StateNotFound, "conservation state not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_are_trimmed_and_bounded() {
        assert_eq!(normalize_category_name("  Monumento ").unwrap(), "Monumento");
        assert!(normalize_category_name("   ").is_err());
        assert!(normalize_category_name(&"x".repeat(121)).is_err());
        assert!(normalize_category_name(&"x".repeat(120)).is_ok());
    }
}
