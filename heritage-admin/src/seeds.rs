use diesel::prelude::*;

use heritage_shared::errors::{AppError, AppResult};

use crate::models::{NewFlag, NewRolePermission, NewUser, User};
use crate::rbac::{self, ROLE_ADMIN, ROLE_EDITOR, ROLE_USER};
use crate::schema::{
    categories, flags, permissions, role_permissions, roles, sites, states, tags, users,
};
use crate::services::site_service::{self, SiteInput};
use crate::services::{flag_service, password_service, tag_service, user_service};

pub const CATEGORIES: &[&str] = &["Arquitectura", "Sitio Arqueológico", "Monumento"];
pub const STATES: &[&str] = &["Good", "Fair", "Poor"];
pub const TAGS: &[&str] = &["history", "art", "architecture"];

struct SeedUser {
    email: &'static str,
    first_name: &'static str,
    password: &'static str,
    role: &'static str,
    sys_admin: bool,
    active: bool,
}

const USERS: &[SeedUser] = &[
    SeedUser {
        email: "admin@example.com",
        first_name: "Admin",
        password: "adminpass",
        role: ROLE_ADMIN,
        sys_admin: true,
        active: true,
    },
    SeedUser {
        email: "user@example.com",
        first_name: "User",
        password: "userpass",
        role: ROLE_USER,
        sys_admin: false,
        active: true,
    },
    SeedUser {
        email: "editor@example.com",
        first_name: "Guest",
        password: "guestpass",
        role: ROLE_EDITOR,
        sys_admin: false,
        active: false,
    },
];

struct SeedSite {
    name: &'static str,
    short_desc: &'static str,
    full_desc: &'static str,
    opening_year: i32,
    coordinates: (f64, f64),
    category: &'static str,
    state: &'static str,
    tags: &'static [&'static str],
}

const SITES: &[SeedSite] = &[
    SeedSite {
        name: "Casa Vieja",
        short_desc: "Casona colonial restaurada",
        full_desc: "Residencia de fines del siglo XIX con patio central y galerías originales.",
        opening_year: 1884,
        coordinates: (-34.9205, -57.9536),
        category: "Arquitectura",
        state: "Good",
        tags: &["history", "architecture"],
    },
    SeedSite {
        name: "Museo Central",
        short_desc: "Museo de historia regional",
        full_desc: "Colecciones de arte y documentos sobre la fundación de la ciudad.",
        opening_year: 1910,
        coordinates: (-34.9093, -57.9322),
        category: "Arquitectura",
        state: "Fair",
        tags: &["history", "art"],
    },
    SeedSite {
        name: "Monumento Libertad",
        short_desc: "Monumento conmemorativo",
        full_desc: "Columna de mármol erigida en homenaje a la independencia.",
        opening_year: 1932,
        coordinates: (-34.9214, -57.9545),
        category: "Monumento",
        state: "Poor",
        tags: &["history"],
    },
];

const FLAGS: &[(&str, &str, bool)] = &[
    (flag_service::ADMIN_MAINTENANCE, "Admin maintenance mode", false),
    (flag_service::PORTAL_MAINTENANCE, "Portal maintenance mode", false),
    (flag_service::REVIEWS_ENABLED, "Allow users to submit reviews", true),
];

#[derive(Debug, Default)]
pub struct SeedReport {
    pub users: usize,
    pub tags: usize,
    pub sites: usize,
}

/// Inserts reference data and demo content. Rows that already exist are left alone.
pub fn run(conn: &mut PgConnection) -> AppResult<SeedReport> {
    conn.transaction(|conn| {
        seed_rbac(conn)?;
        seed_lookups(conn)?;
        seed_flags(conn)?;

        let mut report = SeedReport::default();
        let mut admin = None;
        for seed in USERS {
            let (user, created) = seed_user(conn, seed)?;
            if created {
                report.users += 1;
            }
            if seed.sys_admin {
                admin = Some(user);
            }
        }
        let admin = admin.ok_or_else(|| AppError::internal("seed data has no system administrator"))?;

        for name in TAGS {
            if find_tag_id(conn, name)?.is_none() {
                tag_service::create_tag(conn, name)?;
                report.tags += 1;
            }
        }
        for seed in SITES {
            if seed_site(conn, seed, admin.id)? {
                report.sites += 1;
            }
        }

        tracing::info!(
            users = report.users,
            tags = report.tags,
            sites = report.sites,
            "seed data applied"
        );
        Ok(report)
    })
}

fn seed_rbac(conn: &mut PgConnection) -> AppResult<()> {
    for name in rbac::perm::ALL {
        diesel::insert_into(permissions::table)
            .values(permissions::name.eq(*name))
            .on_conflict(permissions::name)
            .do_nothing()
            .execute(conn)?;
    }

    for (role, perms) in rbac::default_matrix() {
        diesel::insert_into(roles::table)
            .values(roles::name.eq(role))
            .on_conflict(roles::name)
            .do_nothing()
            .execute(conn)?;
        let role_id: i32 = roles::table
            .filter(roles::name.eq(role))
            .select(roles::id)
            .first(conn)?;

        let permission_ids: Vec<i32> = permissions::table
            .filter(permissions::name.eq_any(perms))
            .select(permissions::id)
            .load(conn)?;
        let rows: Vec<NewRolePermission> = permission_ids
            .into_iter()
            .map(|permission_id| NewRolePermission { role_id, permission_id })
            .collect();
        if !rows.is_empty() {
            diesel::insert_into(role_permissions::table)
                .values(&rows)
                .on_conflict((role_permissions::role_id, role_permissions::permission_id))
                .do_nothing()
                .execute(conn)?;
        }
    }
    Ok(())
}

fn seed_lookups(conn: &mut PgConnection) -> AppResult<()> {
    for name in CATEGORIES {
        diesel::insert_into(categories::table)
            .values(categories::name.eq(*name))
            .on_conflict(categories::name)
            .do_nothing()
            .execute(conn)?;
    }
    for name in STATES {
        diesel::insert_into(states::table)
            .values(states::name.eq(*name))
            .on_conflict(states::name)
            .do_nothing()
            .execute(conn)?;
    }
    Ok(())
}

fn seed_flags(conn: &mut PgConnection) -> AppResult<()> {
    for (name, description, is_enabled) in FLAGS {
        diesel::insert_into(flags::table)
            .values(&NewFlag {
                name: name.to_string(),
                description: description.to_string(),
                is_enabled: *is_enabled,
                message: None,
                user_id: None,
            })
            .on_conflict(flags::name)
            .do_nothing()
            .execute(conn)?;
    }
    Ok(())
}

/// Demo accounts bypass the password policy.
fn seed_user(conn: &mut PgConnection, seed: &SeedUser) -> AppResult<(User, bool)> {
    if let Some(user) = user_service::find_by_email(conn, seed.email)? {
        return Ok((user, false));
    }
    let role_id: Option<i32> = roles::table
        .filter(roles::name.eq(seed.role))
        .select(roles::id)
        .first(conn)
        .optional()?;

    let user: User = diesel::insert_into(users::table)
        .values(&NewUser {
            email: seed.email.to_string(),
            first_name: seed.first_name.to_string(),
            last_name: None,
            password_hash: Some(password_service::hash_password(seed.password)?),
            active: seed.active,
            sys_admin: seed.sys_admin,
            avatar: None,
            role_id,
        })
        .get_result(conn)?;
    Ok((user, true))
}

fn find_tag_id(conn: &mut PgConnection, name: &str) -> AppResult<Option<i32>> {
    Ok(tags::table
        .filter(tags::slug.eq(tag_service::slugify(name)))
        .select(tags::id)
        .first(conn)
        .optional()?)
}

fn category_id(conn: &mut PgConnection, name: &str) -> AppResult<i32> {
    Ok(categories::table
        .filter(categories::name.eq(name))
        .select(categories::id)
        .first(conn)?)
}

fn state_id(conn: &mut PgConnection, name: &str) -> AppResult<i32> {
    Ok(states::table
        .filter(states::name.eq(name))
        .select(states::id)
        .first(conn)?)
}

fn seed_site(conn: &mut PgConnection, seed: &SeedSite, admin_id: i32) -> AppResult<bool> {
    let exists: bool = diesel::select(diesel::dsl::exists(
        sites::table.filter(sites::site_name.eq(seed.name)),
    ))
    .get_result(conn)?;
    if exists {
        return Ok(false);
    }

    let input = SiteInput {
        site_name: seed.name.to_string(),
        short_desc: seed.short_desc.to_string(),
        full_desc: seed.full_desc.to_string(),
        city: "La Plata".to_string(),
        province: "Buenos Aires".to_string(),
        opening_year: seed.opening_year,
        latitude: Some(seed.coordinates.0),
        longitude: Some(seed.coordinates.1),
        category_id: category_id(conn, seed.category)?,
        state_id: state_id(conn, seed.state)?,
        active: true,
    };
    let site = site_service::create_site(conn, input, admin_id)?;

    let mut tag_ids = Vec::with_capacity(seed.tags.len());
    for name in seed.tags {
        if let Some(id) = find_tag_id(conn, name)? {
            tag_ids.push(id);
        }
    }
    site_service::set_tags(conn, site.id, &tag_ids, admin_id)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_sites_pass_field_validation() {
        for seed in SITES {
            let input = SiteInput {
                site_name: seed.name.into(),
                short_desc: seed.short_desc.into(),
                full_desc: seed.full_desc.into(),
                city: "La Plata".into(),
                province: "Buenos Aires".into(),
                opening_year: seed.opening_year,
                latitude: Some(seed.coordinates.0),
                longitude: Some(seed.coordinates.1),
                category_id: 1,
                state_id: 1,
                active: true,
            };
            assert!(input.check().is_ok(), "{} should be valid", seed.name);
            assert!(CATEGORIES.contains(&seed.category));
            assert!(STATES.contains(&seed.state));
            assert!(seed.tags.iter().all(|t| TAGS.contains(t)));
        }
    }

    #[test]
    fn demo_tags_are_valid_names() {
        for name in TAGS {
            assert!(tag_service::normalize_tag_name(name).is_ok());
        }
    }

    #[test]
    fn exactly_one_sys_admin_and_flags_cover_maintenance() {
        assert_eq!(USERS.iter().filter(|u| u.sys_admin).count(), 1);
        assert!(USERS.iter().any(|u| !u.active));
        assert!(FLAGS.iter().any(|(name, _, on)| *name == flag_service::REVIEWS_ENABLED && *on));
        assert!(FLAGS
            .iter()
            .filter(|(name, _, _)| flag_service::is_maintenance_flag(name))
            .all(|(_, _, on)| !on));
    }
}
