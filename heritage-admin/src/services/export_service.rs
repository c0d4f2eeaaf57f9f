use chrono::{DateTime, Utc};
use serde::Serialize;

use heritage_shared::errors::{AppError, AppResult};

use crate::services::site_service::SiteListItem;

const BOM: &str = "\u{feff}";

pub const HEADERS: [&str; 10] = [
    "ID",
    "Name",
    "Short description",
    "City",
    "Province",
    "Conservation state",
    "Registered at",
    "Latitude",
    "Longitude",
    "Tags",
];

#[derive(Debug, Serialize)]
struct SiteRecord<'a> {
    #[serde(rename = "ID")]
    id: i32,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Short description")]
    short_desc: &'a str,
    #[serde(rename = "City")]
    city: &'a str,
    #[serde(rename = "Province")]
    province: &'a str,
    #[serde(rename = "Conservation state")]
    state: &'a str,
    #[serde(rename = "Registered at")]
    registered_at: String,
    #[serde(rename = "Latitude")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    longitude: Option<f64>,
    #[serde(rename = "Tags")]
    tags: String,
}

impl<'a> From<&'a SiteListItem> for SiteRecord<'a> {
    fn from(item: &'a SiteListItem) -> Self {
        let tags = if item.tags.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = item.tags.iter().map(|t| t.name.as_str()).collect();
            format!("[{}]", names.join(", "))
        };
        Self {
            id: item.site.id,
            name: &item.site.site_name,
            short_desc: &item.site.short_desc,
            city: &item.site.city,
            province: &item.site.province,
            state: &item.state,
            registered_at: item.site.registration.format("%Y-%m-%d %H:%M:%S").to_string(),
            latitude: item.site.latitude,
            longitude: item.site.longitude,
            tags,
        }
    }
}

/// CSV document for the given sites, prefixed with a UTF-8 byte order mark.
pub fn sites_csv(items: &[SiteListItem]) -> AppResult<String> {
    // serialize() only emits a header alongside the first row
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(HEADERS).map_err(anyhow::Error::from)?;
    for item in items {
        wtr.serialize(SiteRecord::from(item)).map_err(anyhow::Error::from)?;
    }
    wtr.flush().map_err(anyhow::Error::from)?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| AppError::internal(format!("csv buffer: {e}")))?;
    let body = String::from_utf8(bytes).map_err(anyhow::Error::from)?;
    Ok(format!("{BOM}{body}"))
}

pub fn csv_filename(now: DateTime<Utc>) -> String {
    format!("sites_{}.csv", now.format("%Y%m%d_%H%M"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Site, Tag};
    use crate::services::site_service::RatingSummary;
    use chrono::TimeZone;

    fn item(tags: &[&str]) -> SiteListItem {
        let registered = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        SiteListItem {
            site: Site {
                id: 7,
                site_name: "Casa Vieja".into(),
                short_desc: "Casa, antigua".into(),
                full_desc: "Casa histórica".into(),
                city: "La Plata".into(),
                province: "Buenos Aires".into(),
                opening_year: 1890,
                latitude: Some(-34.92),
                longitude: None,
                category_id: 1,
                state_id: 1,
                active: true,
                deleted: false,
                views: 0,
                registration: registered,
                updated_at: registered,
            },
            category: "Arquitectura".into(),
            state: "Good".into(),
            tags: tags
                .iter()
                .enumerate()
                .map(|(i, name)| Tag {
                    id: i as i32 + 1,
                    name: name.to_string(),
                    slug: name.to_string(),
                    created_at: registered,
                })
                .collect(),
            cover_url: String::new(),
            rating: RatingSummary::default(),
        }
    }

    #[test]
    fn csv_starts_with_bom_and_header() {
        let csv = sites_csv(&[]).unwrap();
        assert!(csv.starts_with('\u{feff}'));
        assert_eq!(
            csv.trim_start_matches('\u{feff}').trim_end(),
            "ID,Name,Short description,City,Province,Conservation state,Registered at,Latitude,Longitude,Tags"
        );
    }

    #[test]
    fn rows_format_dates_tags_and_quote_commas() {
        let csv = sites_csv(&[item(&["history", "art"]), item(&[])]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[1],
            "7,Casa Vieja,\"Casa, antigua\",La Plata,Buenos Aires,Good,2024-03-05 14:07:09,-34.92,,\"[history, art]\""
        );
        assert!(lines[2].ends_with(",-34.92,,"));
    }

    #[test]
    fn filename_uses_minute_precision() {
        let now = Utc.with_ymd_and_hms(2025, 11, 2, 9, 5, 59).unwrap();
        assert_eq!(csv_filename(now), "sites_20251102_0905.csv");
    }
}
