//! URL canonicalization, dedup and affiliate rewriting for outbound embed links.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static IFRAME_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src=["\\']([^"\\']+)"#).unwrap());

static CHOBIT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(https?://[^\s"'>]*chobit\.cc[^\s"'>]*)|(//[^\s"'>]*chobit\.cc[^\s"'>]*)"#)
        .unwrap()
});

/// `//host/a.jpg` → `https://host/a.jpg`. Empty or absent input stays absent.
pub fn normalize(url: Option<&str>) -> Option<String> {
    let url = url?.trim();
    if url.is_empty() {
        return None;
    }
    if url.starts_with("//") {
        return Some(format!("https:{}", url));
    }
    Some(url.to_string())
}

/// Normalize then drop duplicates, keeping first-seen order.
pub fn dedupe<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter_map(|u| normalize(Some(u.as_ref())))
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

/// Point an embed link at our affiliate account.
///
/// Accepts either a bare URL or a whole `<iframe ...>` tag. The `aid` query
/// parameter is set (replacing any existing value in place); every other
/// parameter and the fragment survive. Applying it twice is a no-op.
pub fn rewrite_affiliate(raw: Option<&str>, affiliate_id: &str) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    let src = if raw.contains("<iframe") {
        IFRAME_SRC
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(raw)
    } else {
        raw
    };
    let src = normalize(Some(src))?;

    let Ok(mut url) = Url::parse(&src) else {
        debug!("Leaving unparseable embed URL untouched: {}", src);
        return Some(src);
    };

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut has_aid = false;
    for (k, v) in url.query_pairs() {
        if k == "aid" {
            if has_aid {
                continue;
            }
            has_aid = true;
            pairs.push((k.into_owned(), affiliate_id.to_string()));
        } else {
            pairs.push((k.into_owned(), v.into_owned()));
        }
    }
    if !has_aid {
        pairs.push(("aid".to_string(), affiliate_id.to_string()));
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);
    Some(url.to_string())
}

/// Undo the handful of HTML entities that show up around embed snippets.
pub fn unescape_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|&i| i <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// First embed-provider URL anywhere in arbitrary page text (markup, inline
/// scripts with `\/` escapes, textarea snippets).
pub fn find_embed_url(text: &str) -> Option<String> {
    let cleaned = unescape_entities(text).replace("\\/", "/");
    let m = CHOBIT_URL.find(&cleaned)?;
    normalize(Some(m.as_str()))
}
