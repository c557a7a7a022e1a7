//! Readers for the search engine's result pages.
//!
//! Result markup changes every so often, so everything that knows about tag
//! names and classes lives behind [`SiteAdapter`]. Each markup version gets
//! its own adapter; the walker only talks to the trait.
//!
//! # Adapters
//!
//! | Markup | Module | Titles | Dates | Next page |
//! |--------|--------|--------|-------|-----------|
//! | Classic results | [`classic`] | `h3.r a` | `span.st`, forum `div.slp` | `a.pn#pnnext` |

use crate::models::Source;
use chrono::NaiveDate;

pub mod classic;

/// Knows how to read one version of the result markup.
pub trait SiteAdapter {
    /// Phrase opening the "pages that include matching images" section.
    fn section_marker(&self) -> &str;

    /// Ordered `(link, date)` pairs found on one result page.
    fn extract_sources(&self, markup: &str, today: NaiveDate) -> Vec<Source>;

    /// Raw href of the next-page link, if the page has one.
    fn next_page(&self, markup: &str) -> Option<String>;
}

/// The part of `markup` starting at `marker`, or `None` if it is absent.
pub fn truncate_to_section<'a>(markup: &'a str, marker: &str) -> Option<&'a str> {
    markup.find(marker).map(|i| &markup[i..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_section() {
        let html = "<div>ads</div><h2>Páginas que incluem imagens correspondentes</h2><h3>x</h3>";
        let cut = truncate_to_section(html, "Páginas que incluem imagens correspondentes").unwrap();
        assert!(cut.starts_with("Páginas"));
        assert!(!cut.contains("ads"));
        assert!(truncate_to_section("<html></html>", "Páginas").is_none());
    }
}
