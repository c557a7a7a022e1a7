//! Adapter for the classic result markup.
//!
//! # Page shape
//!
//! ```text
//! div.g                      one result box
//! ├── h3.r > a[href]         title and outgoing link
//! ├── span.st > span         "<site> - 12 de mar de 2015 - " metadata
//! └── div.slp                forum threads only: "12 posts - 3 autores - 2 dias atrás"
//! a.pn#pnnext                next result page
//! ```
//!
//! Forum results carry their date in `div.slp` instead of `span.st`, which
//! leaves fewer known dates than links. When that happens the forum dates are
//! backfilled positionally, box by box.

use super::SiteAdapter;
use crate::config::DEFAULT_SECTION_MARKER;
use crate::dates::{UNKNOWN_DATE, normalize};
use crate::models::Source;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h3.r").unwrap());
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static META: Lazy<Selector> = Lazy::new(|| Selector::parse("span.st").unwrap());
static META_INNER: Lazy<Selector> = Lazy::new(|| Selector::parse("span").unwrap());
static RESULT_BOX: Lazy<Selector> = Lazy::new(|| Selector::parse("div.g").unwrap());
static FORUM: Lazy<Selector> = Lazy::new(|| Selector::parse("div.slp").unwrap());
static NEXT_PAGE: Lazy<Selector> = Lazy::new(|| Selector::parse("a.pn#pnnext").unwrap());

static DATE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2} de \p{L}{3}\.? de \d{4}|\d+ \p{L}+ atrás").unwrap());

const SEPARATOR: &str = " - ";

#[derive(Debug, Clone)]
pub struct ClassicResults {
    marker: String,
}

impl ClassicResults {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
        }
    }
}

impl Default for ClassicResults {
    fn default() -> Self {
        Self::new(DEFAULT_SECTION_MARKER)
    }
}

impl SiteAdapter for ClassicResults {
    fn section_marker(&self) -> &str {
        &self.marker
    }

    #[instrument(level = "debug", skip_all)]
    fn extract_sources(&self, markup: &str, today: NaiveDate) -> Vec<Source> {
        let document = Html::parse_document(markup);

        let links: Vec<String> = document
            .select(&TITLE)
            .filter_map(|title| title.select(&LINK).next())
            .filter_map(|a| a.value().attr("href"))
            .map(str::to_string)
            .collect();

        if links.is_empty() {
            return Vec::new();
        }

        let mut dates: Vec<String> = document
            .select(&META)
            .map(|meta| metadata_date(meta, today))
            .collect();

        let known = dates.iter().filter(|d| !d.is_empty()).count();
        if known < links.len() {
            backfill_forum_dates(&document, &mut dates, links.len(), today);
        }

        debug!(links = links.len(), dates = dates.len(), known, "Parsed result page");
        links
            .into_iter()
            .zip(dates)
            .map(|(link, date)| Source::new(link, date))
            .collect()
    }

    fn next_page(&self, markup: &str) -> Option<String> {
        let document = Html::parse_document(markup);
        document
            .select(&NEXT_PAGE)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string)
    }
}

/// Date shown after the first separator of a metadata element, if any.
fn metadata_date(meta: ElementRef<'_>, today: NaiveDate) -> String {
    let Some(inner) = meta.select(&META_INNER).next() else {
        return UNKNOWN_DATE.to_string();
    };
    let text = inner.text().collect::<String>();
    match text.split(SEPARATOR).nth(1) {
        Some(raw) => normalize(raw.trim(), today),
        None => UNKNOWN_DATE.to_string(),
    }
}

/// Date string of a forum thread element.
fn forum_date(slp: ElementRef<'_>) -> String {
    let text = slp.text().collect::<String>();
    match DATE_LIKE.find_iter(&text).last() {
        Some(m) => m.as_str().to_string(),
        None => text.rsplit(SEPARATOR).next().unwrap_or_default().trim().to_string(),
    }
}

/// Fill unknown dates of forum-style boxes with the forum dates, in order.
///
/// Box `i` is assumed to line up with `dates[i]`. Forum dates left over once
/// the forum boxes run out are dropped.
fn backfill_forum_dates(
    document: &Html,
    dates: &mut Vec<String>,
    link_count: usize,
    today: NaiveDate,
) {
    let mut forum_dates = document.select(&FORUM).map(forum_date);
    if dates.len() < link_count {
        dates.resize(link_count, UNKNOWN_DATE.to_string());
    }

    let mut filled = 0usize;
    for (i, result_box) in document.select(&RESULT_BOX).enumerate() {
        if result_box.select(&FORUM).next().is_none() {
            continue;
        }
        let Some(raw) = forum_dates.next() else {
            break;
        };
        if let Some(slot) = dates.get_mut(i) {
            if slot.is_empty() {
                *slot = normalize(&raw, today);
                filled += 1;
            }
        }
    }

    debug!(filled, "Backfilled forum dates");
}
