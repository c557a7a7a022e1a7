//! Descriptive metadata of an arbitrary source page.
//!
//! Used to get a quick look at what a collected source is about. Every field
//! follows a fallback chain over the usual meta tags: Open Graph first, then
//! Twitter cards, then the plain `name=` tags and finally document elements.

use crate::error::Result;
use crate::fetch::{PageFetch, normalize_url};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::instrument;

static TITLE_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static ARTICLE_TAGS: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="article:tag"]"#).unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    /// Author, or the site name, or the URL itself.
    pub author: String,
    pub published: Option<String>,
    pub keywords: Vec<String>,
}

/// Read metadata out of already fetched markup.
pub fn extract_metadata(markup: &str, url: &str) -> PageMetadata {
    let document = Html::parse_document(markup);
    let meta = |attr: &str, key: &str| meta_content(&document, attr, key);

    let title = meta("property", "og:title")
        .or_else(|| meta("name", "twitter:title"))
        .or_else(|| meta("name", "title"))
        .or_else(|| element_text(&document, &TITLE_TAG))
        .or_else(|| element_text(&document, &H1));

    let description = meta("property", "og:description")
        .or_else(|| meta("name", "twitter:description"))
        .or_else(|| meta("name", "description"));

    let image = meta("property", "og:image")
        .or_else(|| meta("name", "twitter:image"))
        .or_else(|| meta("name", "image"));

    let author = meta("property", "og:author")
        .or_else(|| meta("name", "twitter:author"))
        .or_else(|| meta("name", "author"))
        .or_else(|| meta("property", "og:site_name"))
        .unwrap_or_else(|| url.to_string());

    let published = meta("property", "article:published_time");

    let mut keywords: Vec<String> = meta("name", "keywords")
        .map(|raw| {
            raw.split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();
    keywords.extend(
        document
            .select(&ARTICLE_TAGS)
            .filter_map(|el| el.value().attr("content"))
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty()),
    );

    PageMetadata {
        url: url.to_string(),
        title,
        description,
        image,
        author,
        published,
        keywords,
    }
}

/// Fetch `url` and read its metadata.
#[instrument(level = "info", skip(fetcher))]
pub async fn fetch_metadata<F: PageFetch>(fetcher: &F, url: &str) -> Result<PageMetadata> {
    let url = normalize_url(url);
    let markup = fetcher.fetch(&url, false).await?;
    Ok(extract_metadata(&markup, &url))
}

fn meta_content(document: &Html, attr: &str, key: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[{attr}="{key}"]"#)).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

fn element_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
}
