pub mod admin;
pub mod auth;
pub mod health;
pub mod portal;

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use serde::Serialize;

use heritage_shared::errors::{AppError, AppResult, ErrorCode};
use heritage_shared::types::pagination::PaginationParams;

use crate::search::SearchQuery;
use crate::services::image_service::{ImageMetadata, ImageUpload, MAX_IMAGE_BYTES};

pub const ADMIN_PER_PAGE: u64 = 25;

/// Request body limit for image uploads; the image itself is checked separately.
pub const UPLOAD_BODY_LIMIT: usize = MAX_IMAGE_BYTES + 512 * 1024;

/// Raw query-string pairs for list endpoints. Repeated keys are preserved.
#[derive(Debug, Clone)]
pub struct ListParams {
    pairs: Vec<(String, String)>,
    pub pagination: PaginationParams,
}

impl ListParams {
    pub fn new(pairs: Vec<(String, String)>, default_per_page: u64) -> Self {
        let raw = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        let pagination = PaginationParams::parse(raw("page"), raw("per_page"), default_per_page);
        Self { pairs, pagination }
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn search(&self) -> SearchQuery {
        SearchQuery::from_params(self.pairs())
    }
}

#[derive(Debug, Serialize)]
pub struct Removed {
    pub id: i32,
    pub removed: bool,
}

impl Removed {
    pub fn new(id: i32) -> Self {
        Self { id, removed: true }
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(ErrorCode::PayloadTooLarge, "image exceeds 5 MiB")
    } else {
        AppError::bad_request(format!("invalid multipart body: {e}"))
    }
}

/// Reads the `file`, `title_alt` and `description` fields of an image form.
pub async fn read_image_upload(mut multipart: Multipart) -> AppResult<ImageUpload> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title_alt = String::new();
    let mut description = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((content_type, data.to_vec()));
            }
            Some("title_alt") => title_alt = field.text().await.map_err(multipart_error)?,
            Some("description") => description = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let (content_type, data) = file.ok_or_else(|| AppError::validation("an image file is required"))?;
    Ok(ImageUpload {
        content_type,
        data,
        metadata: ImageMetadata { title_alt, description },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn pagination_is_read_from_pairs() {
        let params = ListParams::new(pairs(&[("page", "3"), ("per_page", "10"), ("city", "La Plata")]), 25);
        assert_eq!(params.pagination.page(), 3);
        assert_eq!(params.pagination.limit(), 10);
        assert_eq!(params.search().conditions.len(), 1);
    }

    #[test]
    fn unparsable_pagination_falls_back_to_defaults() {
        let params = ListParams::new(pairs(&[("page", "two"), ("per_page", "")]), ADMIN_PER_PAGE);
        assert_eq!(params.pagination.page(), 1);
        assert_eq!(params.pagination.limit(), ADMIN_PER_PAGE);
    }

    #[test]
    fn get_skips_blank_values() {
        let params = ListParams::new(pairs(&[("q", "  "), ("status", " pending ")]), 10);
        assert_eq!(params.get("q"), None);
        assert_eq!(params.get("status"), Some("pending"));
    }
}
