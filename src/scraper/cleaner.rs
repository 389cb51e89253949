use crate::models::{DynamicInfo, RateCount};
use crate::scraper::urls::normalize;
use serde_json::Value;
use tracing::debug;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Integer out of whatever the endpoint sent: `1234`, `"1,234"`, `"1234円"`, `12.0`.
pub fn parse_count(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "-" || s == "N/A" {
                return None;
            }
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

/// Float out of a number or numeric string. `"4.56"` → 4.56
pub fn parse_rate(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// `0`/`1`, `true`/`false` or `"0"`/`"1"`.
pub fn parse_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        other => parse_count(other).map(|n| n != 0),
    }
}

fn non_empty_str(v: &Value) -> Option<String> {
    v.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Rating histogram arrives either as a list of buckets or as an object keyed
/// by review point.
pub fn parse_rate_counts(v: &Value) -> Vec<RateCount> {
    let bucket = |b: &Value| RateCount {
        review_point: b.get("review_point").and_then(parse_count).unwrap_or(0),
        count: b.get("count").and_then(parse_count).unwrap_or(0),
        ratio: b.get("ratio").and_then(parse_count).unwrap_or(0),
    };

    match v {
        Value::Array(items) => items.iter().filter(|b| b.is_object()).map(bucket).collect(),
        Value::Object(map) => {
            let mut out: Vec<RateCount> = map
                .iter()
                .filter(|(_, b)| b.is_object())
                .map(|(k, b)| {
                    let mut rc = bucket(b);
                    if rc.review_point == 0 {
                        rc.review_point = k.parse().unwrap_or(0);
                    }
                    rc
                })
                .collect();
            out.sort_by_key(|rc| rc.review_point);
            out
        }
        _ => vec![],
    }
}

// ── AJAX entry → DynamicInfo ──────────────────────────────────────────────────

/// Clean one work's entry from the product info endpoint.
pub fn clean_dynamic(entry: &Value) -> DynamicInfo {
    if !entry.is_object() {
        debug!("Dynamic entry is not an object: {}", entry);
        return DynamicInfo::default();
    }

    DynamicInfo {
        site_id: entry.get("site_id").and_then(non_empty_str),
        work_image: normalize(entry.get("work_image").and_then(Value::as_str)),
        dl_count: entry.get("dl_count").and_then(parse_count),
        price: entry.get("price").and_then(parse_count),
        rate_average: entry
            .get("rate_average_2dp")
            .and_then(parse_rate)
            .or_else(|| entry.get("rate_average").and_then(parse_rate)),
        wishlist_count: entry.get("wishlist_count").and_then(parse_count),
        rate_count_detail: entry
            .get("rate_count_detail")
            .map(parse_rate_counts)
            .unwrap_or_default(),
        affiliate_deny: entry.get("affiliate_deny").and_then(parse_flag),
    }
}

// ── Voice actors ──────────────────────────────────────────────────────────────

/// Drop blank cells and the "/" separator the outline table sometimes leaves.
pub fn clean_cv(cv: &[String]) -> Vec<String> {
    cv.iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty() && *c != "/")
        .map(str::to_string)
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(&json!(1234)), Some(1234));
        assert_eq!(parse_count(&json!("1,234")), Some(1234));
        assert_eq!(parse_count(&json!("880円")), Some(880));
        assert_eq!(parse_count(&json!(12.0)), Some(12));
        assert_eq!(parse_count(&json!("")), None);
        assert_eq!(parse_count(&json!(null)), None);
    }

    #[test]
    fn test_clean_dynamic_full_entry() {
        let entry = json!({
            "site_id": "maniax",
            "work_image": "//img.dlsite.jp/modpub/images2/work/doujin/RJ01000001_img_main.jpg",
            "dl_count": "5,120",
            "price": 1320,
            "rate_average": 5,
            "rate_average_2dp": 4.81,
            "wishlist_count": 900,
            "rate_count_detail": [
                {"review_point": 1, "count": 2, "ratio": 1},
                {"review_point": 5, "count": 300, "ratio": 95}
            ],
            "affiliate_deny": 0
        });
        let d = clean_dynamic(&entry);
        assert_eq!(d.site_id.as_deref(), Some("maniax"));
        assert_eq!(
            d.work_image.as_deref(),
            Some("https://img.dlsite.jp/modpub/images2/work/doujin/RJ01000001_img_main.jpg")
        );
        assert_eq!(d.dl_count, Some(5120));
        assert_eq!(d.price, Some(1320));
        assert_eq!(d.rate_average, Some(4.81));
        assert_eq!(d.rate_count_detail.len(), 2);
        assert_eq!(d.rate_count_detail[1].count, 300);
        assert_eq!(d.affiliate_deny, Some(false));
    }

    #[test]
    fn test_rate_counts_keyed_object() {
        let v = json!({"5": {"count": 3, "ratio": 60}, "1": {"count": 2, "ratio": 40}});
        let rc = parse_rate_counts(&v);
        assert_eq!(rc[0], RateCount { review_point: 1, count: 2, ratio: 40 });
        assert_eq!(rc[1].review_point, 5);
    }

    #[test]
    fn test_non_object_entry_is_empty() {
        assert!(clean_dynamic(&json!([])).is_empty());
    }

    #[test]
    fn test_clean_cv() {
        let raw = vec!["Alice".to_string(), " ".to_string(), "/".to_string(), " Bob ".to_string()];
        assert_eq!(clean_cv(&raw), vec!["Alice", "Bob"]);
    }
}
