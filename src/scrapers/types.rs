use crate::error::{Result, ScoutError};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.willhaben.at";
pub const DEFAULT_LISTING_PATH: &str = "/iad/immobilien/mietwohnungen/mietwohnung-angebote";
pub const DEFAULT_ROWS: u32 = 10000;

/// Search parameters for the rental result page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub base_url: String,
    pub listing_path: String,
    pub rows: Option<String>,
    pub sort: Option<String>,
    pub is_navigation: Option<String>,
    pub sf_id: Option<String>,
    pub page: Option<String>,
    /// Maximum rent (EUR)
    pub price_to: Option<String>,
    /// Minimum living area in square meters
    pub living_area_from: Option<String>,
    pub area_ids: Vec<String>,
    pub room_buckets: Vec<String>,
    pub property_types: Vec<String>,
}

impl SearchParams {
    /// Build from any key lookup. Empty values count as unset; multi-value
    /// keys are comma separated.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let single = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let multi = |key: &str| {
            single(key)
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>())
                .unwrap_or_default()
        };

        Self {
            base_url: single("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            listing_path: single("LISTING_PATH")
                .unwrap_or_else(|| DEFAULT_LISTING_PATH.to_string()),
            rows: single("ROWS"),
            sort: single("SORT"),
            is_navigation: single("IS_NAVIGATION"),
            sf_id: single("SF_ID"),
            page: single("PAGE"),
            price_to: single("PRICE_TO"),
            living_area_from: single("ESTATE_SIZE_FROM"),
            area_ids: multi("AREA_IDS"),
            room_buckets: multi("NO_OF_ROOMS_BUCKETS"),
            property_types: multi("PROPERTY_TYPES"),
        }
    }

    /// Full search URL with every set parameter in a stable order.
    pub fn build_url(&self) -> Result<String> {
        let raw = format!("{}{}", self.base_url, self.listing_path);
        let mut url = Url::parse(&raw)
            .map_err(|e| ScoutError::Config(format!("Invalid search URL {}: {}", raw, e)))?;

        let single = [
            ("rows", &self.rows),
            ("sort", &self.sort),
            ("isNavigation", &self.is_navigation),
            ("sfId", &self.sf_id),
            ("page", &self.page),
            ("PRICE_TO", &self.price_to),
            ("ESTATE_SIZE/LIVING_AREA_FROM", &self.living_area_from),
        ];
        let multi = [
            ("areaId", &self.area_ids),
            ("NO_OF_ROOMS_BUCKET", &self.room_buckets),
            ("PROPERTY_TYPE", &self.property_types),
        ];

        {
            let mut query = url.query_pairs_mut();
            for (key, value) in single {
                if let Some(value) = value {
                    query.append_pair(key, value);
                }
            }
            for (key, values) in multi {
                for value in values {
                    query.append_pair(key, value);
                }
            }
        }

        Ok(url.to_string())
    }
}

/// Insert or override the `rows` query parameter.
///
/// With `rows` unset an existing value is kept and a missing one becomes
/// [`DEFAULT_ROWS`]. Other parameters keep their order.
pub fn set_rows_param(url: &str, rows: Option<u32>) -> Result<String> {
    let mut parsed =
        Url::parse(url).map_err(|e| ScoutError::Config(format!("Invalid URL {}: {}", url, e)))?;

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    match rows {
        None if pairs.iter().any(|(k, _)| k == "rows") => return Ok(parsed.to_string()),
        None => pairs.push(("rows".to_string(), DEFAULT_ROWS.to_string())),
        Some(rows) => {
            let mut replaced = false;
            pairs.retain_mut(|(k, v)| {
                if k != "rows" {
                    return true;
                }
                if replaced {
                    return false;
                }
                *v = rows.to_string();
                replaced = true;
                true
            });
            if !replaced {
                pairs.push(("rows".to_string(), rows.to_string()));
            }
        }
    }

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(parsed.to_string())
}
