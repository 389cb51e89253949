use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// One point-in-time capture of a work, persisted as `<code>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkSnapshot {
    pub code: String,
    #[serde(default)]
    pub scraped_at: Option<DateTime<Utc>>,
    #[serde(rename = "static", default, deserialize_with = "null_as_default")]
    pub static_info: StaticInfo,
    #[serde(rename = "dynamic", default, deserialize_with = "null_as_default")]
    pub dynamic_info: DynamicInfo,
}

impl WorkSnapshot {
    pub fn new(code: &str, static_info: StaticInfo, dynamic_info: DynamicInfo) -> Self {
        Self {
            code: code.to_string(),
            scraped_at: Some(Utc::now()),
            static_info,
            dynamic_info,
        }
    }
}

/// `null` reads the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Static page data ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StaticInfo {
    pub title: Option<String>,
    pub circle: Option<String>,
    pub release_date: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub content_tokens: Vec<ContentToken>,
    #[serde(deserialize_with = "null_as_default")]
    pub genres: Vec<String>,
    /// Raw voice actor cells; blanks and "/" are filtered by the read model.
    #[serde(deserialize_with = "null_as_default")]
    pub cv: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub age_limit: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub work_type: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub file_format: Vec<String>,
    /// Sample images
    #[serde(deserialize_with = "null_as_default")]
    pub media: Vec<String>,
    /// Images embedded in the description, never overlapping `media`
    #[serde(deserialize_with = "null_as_default")]
    pub desc_images: Vec<String>,
    pub chobit_url: Option<String>,
    pub file_size: Option<String>,
}

impl StaticInfo {
    pub fn is_empty(&self) -> bool {
        *self == StaticInfo::default()
    }
}

/// Description stream node, keeps text and images in document order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentToken {
    Text { content: String },
    Image { url: String },
}

// ── AJAX data ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DynamicInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dl_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wishlist_count: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub rate_count_detail: Vec<RateCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliate_deny: Option<bool>,
}

impl DynamicInfo {
    pub fn is_empty(&self) -> bool {
        *self == DynamicInfo::default()
    }
}

/// One bucket of the rating histogram.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateCount {
    pub review_point: i64,
    pub count: i64,
    pub ratio: i64,
}

// ── Fetch options ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeOptions {
    pub download_media: bool,
    /// Skip the AJAX endpoint entirely
    pub static_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_token_wire_format() {
        let tokens = vec![
            ContentToken::Text { content: "hi".into() },
            ContentToken::Image { url: "https://x/a.jpg".into() },
        ];
        let json = serde_json::to_value(&tokens).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"type": "text", "content": "hi"},
                {"type": "image", "url": "https://x/a.jpg"}
            ])
        );
    }

    #[test]
    fn test_sparse_snapshot_parses() {
        let snap: WorkSnapshot = serde_json::from_str(
            r#"{"code":"RJ123456","static":{"title":"X","cv":["Alice","Bob"]},"dynamic":{}}"#,
        )
        .unwrap();
        assert_eq!(snap.static_info.title.as_deref(), Some("X"));
        assert!(snap.dynamic_info.is_empty());
        assert!(snap.scraped_at.is_none());
    }

    #[test]
    fn test_null_sections_read_as_empty() {
        let snap: WorkSnapshot = serde_json::from_str(
            r#"{"code":"RJ1","static":{"title":"a","genres":null},"dynamic":null}"#,
        )
        .unwrap();
        assert_eq!(snap.static_info.title.as_deref(), Some("a"));
        assert!(snap.static_info.genres.is_empty());
        assert!(snap.dynamic_info.is_empty());

        let snap: WorkSnapshot =
            serde_json::from_str(r#"{"code":"RJ1","static":null,"dynamic":{"price":1}}"#).unwrap();
        assert!(snap.static_info.is_empty());
        assert_eq!(snap.dynamic_info.price, Some(1));
    }

    #[test]
    fn test_empty_dynamic_serializes_as_empty_object() {
        let snap = WorkSnapshot::new("RJ1", StaticInfo::default(), DynamicInfo::default());
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["dynamic"], serde_json::json!({}));
        assert!(json["static"].is_object());
    }
}
