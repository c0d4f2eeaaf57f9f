use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use heritage_shared::errors::{AppError, AppResult, ErrorCode};

use crate::models::{Flag, NewFlag};
use crate::schema::flags;

pub const ADMIN_MAINTENANCE: &str = "admin_maintenance_mode";
pub const PORTAL_MAINTENANCE: &str = "portal_maintenance_mode";
pub const REVIEWS_ENABLED: &str = "reviews_enabled";

pub const FLAG_NAME_MAX: usize = 50;
pub const FLAG_DESCRIPTION_MAX: usize = 255;
pub const FLAG_MESSAGE_MAX: usize = 100;

pub fn is_maintenance_flag(name: &str) -> bool {
    name.to_ascii_lowercase().contains("maintenance_mode")
}

/// Message to store after a flag switches to `enabled`.
///
/// Maintenance flags need a 1..=100 character message to switch on and lose
/// it when switched off. Other flags keep whatever message they are given.
pub fn resolve_message(name: &str, enabled: bool, message: Option<&str>) -> AppResult<Option<String>> {
    let message = message.map(str::trim).filter(|m| !m.is_empty());
    if let Some(m) = message {
        if m.chars().count() > FLAG_MESSAGE_MAX {
            return Err(AppError::validation(format!(
                "message must be at most {FLAG_MESSAGE_MAX} characters"
            )));
        }
    }

    if !is_maintenance_flag(name) {
        return Ok(message.map(str::to_string));
    }
    if !enabled {
        return Ok(None);
    }
    message
        .map(|m| Some(m.to_string()))
        .ok_or_else(|| {
            AppError::new(
                ErrorCode::MaintenanceMessageRequired,
                "a maintenance message is required to enable maintenance mode",
            )
        })
}

pub fn list_flags(conn: &mut PgConnection) -> AppResult<Vec<Flag>> {
    Ok(flags::table.order(flags::name.asc()).load(conn)?)
}

pub fn get_flag(conn: &mut PgConnection, id: i32) -> AppResult<Flag> {
    flags::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::FlagNotFound, "flag not found"))
}

pub fn find_by_name(conn: &mut PgConnection, name: &str) -> AppResult<Option<Flag>> {
    Ok(flags::table
        .filter(flags::name.eq(name))
        .first(conn)
        .optional()?)
}

/// A missing flag counts as disabled.
pub fn is_enabled(conn: &mut PgConnection, name: &str) -> AppResult<bool> {
    Ok(find_by_name(conn, name)?.is_some_and(|f| f.is_enabled))
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_enabled: bool,
    pub message: Option<String>,
}

fn check_description(description: &str) -> AppResult<()> {
    if description.chars().count() > FLAG_DESCRIPTION_MAX {
        return Err(AppError::validation(format!(
            "description must be at most {FLAG_DESCRIPTION_MAX} characters"
        )));
    }
    Ok(())
}

pub fn create_flag(conn: &mut PgConnection, input: FlagInput, user_id: i32) -> AppResult<Flag> {
    let name = input.name.trim().to_string();
    if name.is_empty() || name.chars().count() > FLAG_NAME_MAX {
        return Err(AppError::validation(format!("name must be 1 to {FLAG_NAME_MAX} characters")));
    }
    let description = input.description.trim().to_string();
    check_description(&description)?;
    let message = resolve_message(&name, input.is_enabled, input.message.as_deref())?;

    if find_by_name(conn, &name)?.is_some() {
        return Err(AppError::new(
            ErrorCode::FlagNameTaken,
            format!("a flag named '{name}' already exists"),
        ));
    }

    let flag: Flag = diesel::insert_into(flags::table)
        .values(&NewFlag {
            name,
            description,
            is_enabled: input.is_enabled,
            message,
            user_id: Some(user_id),
        })
        .get_result(conn)?;
    tracing::info!(flag = %flag.name, user_id, "flag created");
    Ok(flag)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagUpdate {
    pub is_enabled: Option<bool>,
    pub description: Option<String>,
    pub message: Option<String>,
}

pub fn update_flag(conn: &mut PgConnection, id: i32, update: FlagUpdate, user_id: i32) -> AppResult<Flag> {
    let flag = get_flag(conn, id)?;
    let enabled = update.is_enabled.unwrap_or(flag.is_enabled);
    let description = match update.description {
        Some(d) => {
            let d = d.trim().to_string();
            check_description(&d)?;
            d
        }
        None => flag.description.clone(),
    };
    let message = resolve_message(
        &flag.name,
        enabled,
        update.message.as_deref().or(flag.message.as_deref()),
    )?;

    let flag: Flag = diesel::update(flags::table.find(id))
        .set((
            flags::is_enabled.eq(enabled),
            flags::description.eq(description),
            flags::message.eq(message),
            flags::user_id.eq(Some(user_id)),
            flags::last_edit.eq(Utc::now()),
        ))
        .get_result(conn)?;
    tracing::info!(flag = %flag.name, enabled, user_id, "flag updated");
    Ok(flag)
}

/// Flips the flag. `message` is only consulted when a maintenance flag turns on.
pub fn toggle_flag(conn: &mut PgConnection, id: i32, user_id: i32, message: Option<&str>) -> AppResult<Flag> {
    let flag = get_flag(conn, id)?;
    let enabled = !flag.is_enabled;
    let message = if is_maintenance_flag(&flag.name) {
        resolve_message(&flag.name, enabled, message)?
    } else {
        flag.message.clone()
    };

    let flag: Flag = diesel::update(flags::table.find(id))
        .set((
            flags::is_enabled.eq(enabled),
            flags::message.eq(message),
            flags::user_id.eq(Some(user_id)),
            flags::last_edit.eq(Utc::now()),
        ))
        .get_result(conn)?;

    if is_maintenance_flag(&flag.name) {
        tracing::warn!(flag = %flag.name, enabled, user_id, "maintenance mode toggled");
    } else {
        tracing::info!(flag = %flag.name, enabled, user_id, "flag toggled");
    }
    Ok(flag)
}

pub fn delete_flag(conn: &mut PgConnection, id: i32) -> AppResult<()> {
    let deleted = diesel::delete(flags::table.find(id)).execute(conn)?;
    if deleted == 0 {
        return Err(AppError::new(ErrorCode::FlagNotFound, "flag not found"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_flags_are_detected_case_insensitively() {
        assert!(is_maintenance_flag(ADMIN_MAINTENANCE));
        assert!(is_maintenance_flag("Portal_Maintenance_Mode"));
        assert!(!is_maintenance_flag(REVIEWS_ENABLED));
    }

    #[test]
    fn enabling_maintenance_requires_a_message() {
        let err = resolve_message(ADMIN_MAINTENANCE, true, None).unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400);
        assert!(resolve_message(ADMIN_MAINTENANCE, true, Some("   ")).is_err());
        assert_eq!(
            resolve_message(ADMIN_MAINTENANCE, true, Some(" Back at 18:00 ")).unwrap(),
            Some("Back at 18:00".to_string())
        );
    }

    #[test]
    fn disabling_maintenance_clears_the_message() {
        assert_eq!(resolve_message(PORTAL_MAINTENANCE, false, Some("still here")).unwrap(), None);
    }

    #[test]
    fn message_length_is_limited() {
        let long = "m".repeat(FLAG_MESSAGE_MAX + 1);
        assert!(resolve_message(ADMIN_MAINTENANCE, true, Some(&long)).is_err());
        assert!(resolve_message(REVIEWS_ENABLED, true, Some(&long)).is_err());
    }

    #[test]
    fn ordinary_flags_keep_optional_messages() {
        assert_eq!(resolve_message(REVIEWS_ENABLED, true, None).unwrap(), None);
        assert_eq!(
            resolve_message(REVIEWS_ENABLED, false, Some("note")).unwrap(),
            Some("note".to_string())
        );
    }
}
