//! Work page extraction.
//!
//! Nothing in here fails: every field is located independently and a missing
//! element just leaves that field empty. Fields with more than one known
//! location are resolved through an ordered strategy list, first hit wins.

use crate::models::{ContentToken, StaticInfo};
use crate::scraper::urls::{dedupe, find_embed_url, normalize, rewrite_affiliate};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;

// ── Layout ────────────────────────────────────────────────────────────────────

/// `/html/body/div[3]/div[4]/div[1]/div`, the product column.
const PRODUCT_COLUMN: &str =
    "body > div:nth-of-type(3) > div:nth-of-type(4) > div:nth-of-type(1) > div";

const OUTLINE_ROWS: &str = "table#work_outline tr";

const LABEL_RELEASE_DATE: &str = "販売日";
const LABEL_CV: &str = "声優";
const LABEL_AGE_LIMIT: &str = "年齢指定";
const LABEL_WORK_TYPE: &str = "作品形式";
const LABEL_FILE_FORMAT: &str = "ファイル形式";
const LABEL_FILE_SIZE: &str = "ファイル容量";

static WORK_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/[A-Za-z0-9]{4,}$").unwrap());

// ── Strategy types ────────────────────────────────────────────────────────────

type Locator = for<'a> fn(&'a Html) -> Option<ElementRef<'a>>;
type UrlStrategy = fn(&Html) -> Vec<String>;
type EmbedStrategy = fn(&Html, &str) -> Option<String>;

const DESCRIPTION_LOCATORS: &[Locator] = &[description_by_layout, description_by_class];
const SAMPLE_STRATEGIES: &[UrlStrategy] = &[samples_from_slider, samples_from_layout];
const WORK_PAGE_EMBEDS: &[EmbedStrategy] = &[embed_from_iframe, embed_from_raw_text];
const EMBED_PAGE_EMBEDS: &[EmbedStrategy] =
    &[embed_from_embed_tag, embed_from_iframe, embed_from_page_text];

fn locate<'a>(doc: &'a Html, locators: &[Locator]) -> Option<ElementRef<'a>> {
    locators.iter().find_map(|locate| locate(doc))
}

fn first_urls(doc: &Html, strategies: &[UrlStrategy]) -> Vec<String> {
    strategies
        .iter()
        .map(|s| s(doc))
        .find(|urls| !urls.is_empty())
        .unwrap_or_default()
}

fn first_embed(doc: &Html, raw: &str, strategies: &[EmbedStrategy]) -> Option<String> {
    strategies.iter().find_map(|s| s(doc, raw))
}

// ── Work page ─────────────────────────────────────────────────────────────────

/// Parse an item page into [`StaticInfo`]. The embed URL comes back already
/// carrying `affiliate_id`.
pub fn parse_work_page(html: &str, affiliate_id: &str) -> StaticInfo {
    let doc = Html::parse_document(html);

    let description_root = locate(&doc, DESCRIPTION_LOCATORS);

    let media = dedupe(first_urls(&doc, SAMPLE_STRATEGIES));
    let sample_set: HashSet<&str> = media.iter().map(String::as_str).collect();
    let desc_images: Vec<String> = description_root
        .map(description_images)
        .map(dedupe)
        .unwrap_or_default()
        .into_iter()
        .filter(|u| !sample_set.contains(u.as_str()))
        .collect();

    let embed = first_embed(&doc, html, WORK_PAGE_EMBEDS);

    StaticInfo {
        title: select_first(&doc, "h1#work_name").and_then(text_of),
        circle: select_first(&doc, "span.maker_name a").and_then(text_of),
        release_date: outline_values(&doc, LABEL_RELEASE_DATE).into_iter().next(),
        description: description_root.and_then(description_text),
        content_tokens: description_root.map(content_tokens).unwrap_or_default(),
        genres: select_texts(&doc, "div.main_genre a"),
        cv: outline_values(&doc, LABEL_CV),
        age_limit: outline_values(&doc, LABEL_AGE_LIMIT),
        work_type: outline_values(&doc, LABEL_WORK_TYPE),
        file_format: outline_values(&doc, LABEL_FILE_FORMAT),
        file_size: file_size(&doc),
        chobit_url: rewrite_affiliate(embed.as_deref(), affiliate_id),
        media,
        desc_images,
    }
}

// ── Outline table ─────────────────────────────────────────────────────────────

fn outline_row<'a>(doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    let rows = Selector::parse(OUTLINE_ROWS).ok()?;
    let th = Selector::parse("th").ok()?;
    doc.select(&rows).find(|tr| {
        tr.select(&th)
            .next()
            .is_some_and(|h| h.text().collect::<String>().contains(label))
    })
}

/// Cell values for a labelled row: link texts when present, else the cell's
/// own text nodes.
fn outline_values(doc: &Html, label: &str) -> Vec<String> {
    let Some(row) = outline_row(doc, label) else {
        return vec![];
    };
    let Ok(td) = Selector::parse("td") else {
        return vec![];
    };
    let Ok(link) = Selector::parse("td a") else {
        return vec![];
    };

    let linked: Vec<String> = row.select(&link).filter_map(text_of).collect();
    if !linked.is_empty() {
        return linked;
    }

    row.select(&td)
        .flat_map(|cell| cell.children())
        .filter_map(|n| n.value().as_text().map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .collect()
}

fn file_size(doc: &Html) -> Option<String> {
    let row = outline_row(doc, LABEL_FILE_SIZE)?;
    let div = Selector::parse("td div").ok()?;
    row.select(&div)
        .find_map(text_of)
        .or_else(|| outline_values(doc, LABEL_FILE_SIZE).into_iter().next())
}

// ── Description ───────────────────────────────────────────────────────────────

fn description_by_layout(doc: &Html) -> Option<ElementRef<'_>> {
    select_first(doc, &format!("{} > div:nth-of-type(3)", PRODUCT_COLUMN))
}

fn description_by_class(doc: &Html) -> Option<ElementRef<'_>> {
    select_first(doc, "div[class*='work_parts_container']")
}

fn description_text(root: ElementRef<'_>) -> Option<String> {
    let joined = root.text().collect::<Vec<_>>().join("\n");
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Walk the container in document order, emitting text runs and images
/// exactly as they interleave.
pub fn content_tokens(root: ElementRef<'_>) -> Vec<ContentToken> {
    let mut tokens = Vec::new();
    for node in root.descendants() {
        match node.value() {
            Node::Text(text) => {
                let content: &str = text;
                if !content.trim().is_empty() {
                    tokens.push(ContentToken::Text {
                        content: content.to_string(),
                    });
                }
            }
            Node::Element(el) if el.name() == "img" => {
                if let Some(url) = normalize(el.attr("src").or_else(|| el.attr("data-src"))) {
                    tokens.push(ContentToken::Image { url });
                }
            }
            _ => {}
        }
    }
    tokens
}

fn description_images(root: ElementRef<'_>) -> Vec<String> {
    let Ok(img) = Selector::parse("img") else {
        return vec![];
    };
    root.select(&img)
        .filter_map(|i| i.value().attr("src").or_else(|| i.value().attr("data-src")))
        .map(str::to_string)
        .collect()
}

// ── Sample images ─────────────────────────────────────────────────────────────

fn samples_from_slider(doc: &Html) -> Vec<String> {
    let Some(slider) = select_first(
        doc,
        "div#product_slider_data, div[class*='product-slider-data']",
    ) else {
        return vec![];
    };
    let Ok(item) = Selector::parse("div[data-src]") else {
        return vec![];
    };
    slider
        .select(&item)
        .filter_map(|d| d.value().attr("data-src"))
        .map(str::to_string)
        .collect()
}

fn samples_from_layout(doc: &Html) -> Vec<String> {
    let css = format!(
        "{} > div:nth-of-type(1) > div:nth-of-type(1) img",
        PRODUCT_COLUMN
    );
    let Ok(img) = Selector::parse(&css) else {
        return vec![];
    };
    doc.select(&img)
        .filter_map(|i| i.value().attr("data-src").or_else(|| i.value().attr("src")))
        .map(str::to_string)
        .collect()
}

// ── Embeds ────────────────────────────────────────────────────────────────────

fn embed_from_iframe(doc: &Html, _raw: &str) -> Option<String> {
    select_first(doc, "iframe[src*='chobit.cc']")?
        .value()
        .attr("src")
        .map(str::to_string)
}

fn embed_from_raw_text(_doc: &Html, raw: &str) -> Option<String> {
    find_embed_url(raw)
}

fn embed_from_embed_tag(doc: &Html, _raw: &str) -> Option<String> {
    select_first(doc, "div.embed-tag input[value]")?
        .value()
        .attr("value")
        .map(str::to_string)
}

/// Like [`embed_from_raw_text`] but refuses the search page's own URL.
fn embed_from_page_text(_doc: &Html, raw: &str) -> Option<String> {
    find_embed_url(raw).filter(|u| !u.contains("/s/?"))
}

/// What an embed-provider page (search results or work page) tells us.
#[derive(Debug, Default, PartialEq)]
pub struct EmbedPage {
    /// Unrewritten embed URL or iframe snippet
    pub embed: Option<String>,
    /// Relative work links, in page order
    pub work_links: Vec<String>,
}

pub fn parse_embed_page(html: &str) -> EmbedPage {
    let doc = Html::parse_document(html);
    let embed = first_embed(&doc, html, EMBED_PAGE_EMBEDS);

    let work_links = Selector::parse("a[href]")
        .map(|a| {
            doc.select(&a)
                .filter_map(|el| el.value().attr("href"))
                .filter(|href| !href.contains("/s/") && WORK_LINK.is_match(href))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    EmbedPage { embed, work_links }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn select_first<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(css).ok()?;
    doc.select(&sel).next()
}

fn select_texts(doc: &Html, css: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse(css) else {
        return vec![];
    };
    doc.select(&sel).filter_map(text_of).collect()
}

fn text_of(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<String>();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
