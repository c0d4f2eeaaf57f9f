use chrono::Utc;
use diesel::dsl::max;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use heritage_shared::clients::minio::MinioClient;
use heritage_shared::errors::{AppError, AppResult, ErrorCode};

use crate::models::{NewSiteImage, SiteImage};
use crate::schema::site_images;
use crate::services::audit_service::{self, AuditAction};
use crate::services::site_service;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_IMAGES_PER_SITE: i64 = 10;
pub const TITLE_ALT_MAX: usize = 120;
pub const DESCRIPTION_MAX: usize = 255;

/// File extension for an accepted image content type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageMetadata {
    pub title_alt: String,
    pub description: Option<String>,
}

impl ImageMetadata {
    /// Trims both fields; a blank description becomes `None`.
    pub fn normalized(self) -> AppResult<Self> {
        let title_alt = self.title_alt.trim().to_string();
        let length = title_alt.chars().count();
        if length == 0 || length > TITLE_ALT_MAX {
            return Err(AppError::validation(format!(
                "title_alt must be 1 to {TITLE_ALT_MAX} characters"
            )));
        }
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > DESCRIPTION_MAX)
        {
            return Err(AppError::validation(format!(
                "description must be at most {DESCRIPTION_MAX} characters"
            )));
        }
        Ok(Self { title_alt, description })
    }
}

#[derive(Debug)]
pub struct ImageUpload {
    pub content_type: String,
    pub data: Vec<u8>,
    pub metadata: ImageMetadata,
}

impl ImageUpload {
    /// Checks type and size and returns the extension to store under.
    pub fn check(&self) -> AppResult<&'static str> {
        let ext = extension_for(&self.content_type).ok_or_else(|| {
            AppError::validation(format!(
                "unsupported image type '{}'; use jpeg, png or webp",
                self.content_type
            ))
        })?;
        if self.data.is_empty() {
            return Err(AppError::validation("image file is empty"));
        }
        if self.data.len() > MAX_IMAGE_BYTES {
            return Err(AppError::new(ErrorCode::PayloadTooLarge, "image exceeds 5 MiB"));
        }
        Ok(ext)
    }
}

pub fn object_key(site_id: i32, ext: &str) -> String {
    format!("sites/{}/{}.{}", site_id, Uuid::new_v4(), ext)
}

pub fn list_images(conn: &mut PgConnection, site_id: i32) -> AppResult<Vec<SiteImage>> {
    Ok(site_images::table
        .filter(site_images::site_id.eq(site_id))
        .order((site_images::order_index.asc(), site_images::id.asc()))
        .load(conn)?)
}

pub fn get_image(conn: &mut PgConnection, site_id: i32, image_id: i32) -> AppResult<SiteImage> {
    site_images::table
        .find(image_id)
        .filter(site_images::site_id.eq(site_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::ImageNotFound, "image not found"))
}

fn image_count(conn: &mut PgConnection, site_id: i32) -> AppResult<i64> {
    Ok(site_images::table
        .filter(site_images::site_id.eq(site_id))
        .count()
        .get_result(conn)?)
}

pub async fn upload_image(
    conn: &mut PgConnection,
    minio: &MinioClient,
    site_id: i32,
    upload: ImageUpload,
    user_id: i32,
) -> AppResult<SiteImage> {
    site_service::get_site(conn, site_id)?;
    let ext = upload.check()?;
    let metadata = upload.metadata.normalized()?;

    if image_count(conn, site_id)? >= MAX_IMAGES_PER_SITE {
        return Err(AppError::new(
            ErrorCode::ImageLimitReached,
            format!("a site can have at most {MAX_IMAGES_PER_SITE} images"),
        ));
    }

    let key = object_key(site_id, ext);
    let public_url = minio
        .upload(&key, upload.data, &upload.content_type)
        .await
        .map_err(|e| AppError::new(ErrorCode::ImageUploadFailed, e.to_string()))?;

    let stored = conn.transaction(|conn| {
        let current_max: Option<i32> = site_images::table
            .filter(site_images::site_id.eq(site_id))
            .select(max(site_images::order_index))
            .first(conn)?;
        let has_cover = site_images::table
            .filter(site_images::site_id.eq(site_id))
            .filter(site_images::is_cover.eq(true))
            .count()
            .get_result::<i64>(conn)?
            > 0;

        let image: SiteImage = diesel::insert_into(site_images::table)
            .values(&NewSiteImage {
                site_id,
                public_url,
                file_path: key.clone(),
                title_alt: metadata.title_alt,
                description: metadata.description,
                order_index: current_max.unwrap_or(0) + 1,
                is_cover: !has_cover,
            })
            .get_result(conn)?;

        audit_service::record(
            conn,
            site_id,
            user_id,
            AuditAction::ImageAdd,
            format!("Image '{}' added", image.title_alt),
            Some(json!({ "image_id": image.id, "file_path": image.file_path })),
        )?;
        Ok::<_, AppError>(image)
    });

    match stored {
        Ok(image) => {
            tracing::info!(site_id, image_id = image.id, "image uploaded");
            Ok(image)
        }
        Err(err) => {
            if let Err(cleanup) = minio.delete(&key).await {
                tracing::warn!(key = %key, error = %cleanup, "orphaned object after failed insert");
            }
            Err(err)
        }
    }
}

pub fn update_metadata(
    conn: &mut PgConnection,
    site_id: i32,
    image_id: i32,
    metadata: ImageMetadata,
    user_id: i32,
) -> AppResult<SiteImage> {
    let before = get_image(conn, site_id, image_id)?;
    let metadata = metadata.normalized()?;

    conn.transaction(|conn| {
        let image: SiteImage = diesel::update(site_images::table.find(image_id))
            .set((
                site_images::title_alt.eq(&metadata.title_alt),
                site_images::description.eq(&metadata.description),
                site_images::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        audit_service::record(
            conn,
            site_id,
            user_id,
            AuditAction::ImageUpdate,
            format!("Image '{}' updated", image.title_alt),
            Some(json!({
                "image_id": image_id,
                "title_alt": { "old": before.title_alt, "new": image.title_alt },
                "description": { "old": before.description, "new": image.description },
            })),
        )?;
        Ok(image)
    })
}

pub fn set_cover(conn: &mut PgConnection, site_id: i32, image_id: i32, user_id: i32) -> AppResult<SiteImage> {
    get_image(conn, site_id, image_id)?;

    conn.transaction(|conn| {
        diesel::update(
            site_images::table
                .filter(site_images::site_id.eq(site_id))
                .filter(site_images::is_cover.eq(true)),
        )
        .set(site_images::is_cover.eq(false))
        .execute(conn)?;

        let image: SiteImage = diesel::update(site_images::table.find(image_id))
            .set((site_images::is_cover.eq(true), site_images::updated_at.eq(Utc::now())))
            .get_result(conn)?;

        audit_service::record(
            conn,
            site_id,
            user_id,
            AuditAction::Cover,
            format!("Image '{}' set as cover", image.title_alt),
            Some(json!({ "image_id": image_id })),
        )?;
        Ok(image)
    })
}

/// `requested` must be a permutation of `existing`.
pub fn check_order(existing: &[i32], requested: &[i32]) -> AppResult<()> {
    let mut a = existing.to_vec();
    let mut b = requested.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    if a != b {
        return Err(AppError::with_details(
            ErrorCode::InvalidImageOrder,
            "image ids must match the site's images exactly",
            json!({ "expected": a, "received": requested }),
        ));
    }
    Ok(())
}

pub fn reorder(conn: &mut PgConnection, site_id: i32, ids: &[i32], user_id: i32) -> AppResult<Vec<SiteImage>> {
    site_service::get_site(conn, site_id)?;

    conn.transaction(|conn| {
        let existing: Vec<i32> = site_images::table
            .filter(site_images::site_id.eq(site_id))
            .select(site_images::id)
            .load(conn)?;
        check_order(&existing, ids)?;

        let now = Utc::now();
        for (position, id) in ids.iter().enumerate() {
            diesel::update(site_images::table.find(*id))
                .set((
                    site_images::order_index.eq(position as i32 + 1),
                    site_images::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        audit_service::record(
            conn,
            site_id,
            user_id,
            AuditAction::Reorder,
            "Images reordered",
            Some(json!({ "order": ids })),
        )?;
        list_images(conn, site_id)
    })
}

/// Renumbers the remaining images 1..=n and promotes a cover when needed.
fn compact(conn: &mut PgConnection, site_id: i32, promote_cover: bool) -> AppResult<()> {
    let remaining = list_images(conn, site_id)?;
    for (position, image) in remaining.iter().enumerate() {
        let index = position as i32 + 1;
        if image.order_index != index {
            diesel::update(site_images::table.find(image.id))
                .set(site_images::order_index.eq(index))
                .execute(conn)?;
        }
    }
    if promote_cover {
        if let Some(first) = remaining.first() {
            diesel::update(site_images::table.find(first.id))
                .set(site_images::is_cover.eq(true))
                .execute(conn)?;
        }
    }
    Ok(())
}

pub async fn delete_image(
    conn: &mut PgConnection,
    minio: &MinioClient,
    site_id: i32,
    image_id: i32,
    user_id: i32,
) -> AppResult<()> {
    let image = get_image(conn, site_id, image_id)?;

    conn.transaction(|conn| {
        diesel::delete(site_images::table.find(image_id)).execute(conn)?;
        compact(conn, site_id, image.is_cover)?;
        audit_service::record(
            conn,
            site_id,
            user_id,
            AuditAction::ImageDelete,
            format!("Image '{}' deleted", image.title_alt),
            Some(json!({ "image_id": image_id, "file_path": image.file_path, "was_cover": image.is_cover })),
        )?;
        Ok::<_, AppError>(())
    })?;

    if let Err(e) = minio.delete(&image.file_path).await {
        tracing::warn!(key = %image.file_path, error = %e, "failed to delete image object");
    }
    tracing::info!(site_id, image_id, "image deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(title: &str, description: Option<&str>) -> ImageMetadata {
        ImageMetadata {
            title_alt: title.to_string(),
            description: description.map(str::to_string),
        }
    }

    #[test]
    fn accepted_types_map_to_extensions() {
        assert_eq!(extension_for("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for("IMAGE/PNG"), Some("png"));
        assert_eq!(extension_for("image/webp"), Some("webp"));
        assert_eq!(extension_for("image/gif"), None);
        assert_eq!(extension_for("application/pdf"), None);
    }

    #[test]
    fn upload_size_is_limited() {
        let upload = ImageUpload {
            content_type: "image/png".into(),
            data: vec![0; MAX_IMAGE_BYTES + 1],
            metadata: metadata("Fachada", None),
        };
        let err = upload.check().unwrap_err();
        assert_eq!(err.status_code().as_u16(), 413);

        let ok = ImageUpload { data: vec![1; 16], ..upload };
        assert_eq!(ok.check().unwrap(), "png");
    }

    #[test]
    fn metadata_is_trimmed_and_bounded() {
        let m = metadata("  Fachada  ", Some("   ")).normalized().unwrap();
        assert_eq!(m.title_alt, "Fachada");
        assert!(m.description.is_none());

        assert!(metadata("", None).normalized().is_err());
        assert!(metadata(&"a".repeat(121), None).normalized().is_err());
        assert!(metadata("ok", Some(&"d".repeat(256))).normalized().is_err());
    }

    #[test]
    fn object_keys_live_under_the_site() {
        let key = object_key(7, "webp");
        assert!(key.starts_with("sites/7/"));
        assert!(key.ends_with(".webp"));
    }

    #[test]
    fn reorder_requires_an_exact_permutation() {
        assert!(check_order(&[1, 2, 3], &[3, 1, 2]).is_ok());
        assert!(check_order(&[1, 2, 3], &[1, 2]).is_err());
        assert!(check_order(&[1, 2, 3], &[1, 2, 2, 3]).is_err());
        assert!(check_order(&[1, 2, 3], &[1, 2, 4]).is_err());
        assert!(check_order(&[], &[]).is_ok());
    }
}
