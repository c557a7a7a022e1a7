//! Pagination over the result pages of one image.
//!
//! The first page is requested through the time-window rewrite and cut down
//! to the "matching pages" section; every following page is reached through
//! the next-page link and parsed whole. The walk ends when the page budget is
//! spent or the page has no next link.

use crate::error::Result;
use crate::fetch::PageFetch;
use crate::models::Source;
use crate::results::{SiteAdapter, truncate_to_section};
use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// State of one image's walk. Dropped when the walk ends.
#[derive(Debug)]
struct SearchSession {
    target: String,
    page: usize,
    markup: String,
    sources: Vec<Source>,
    budget: usize,
}

impl SearchSession {
    fn new(target: &str, budget: usize) -> Self {
        Self {
            target: target.to_string(),
            page: 0,
            markup: String::new(),
            sources: Vec::new(),
            budget,
        }
    }

    fn budget_spent(&self) -> bool {
        self.page >= self.budget
    }
}

/// Drives a [`PageFetch`] and a [`SiteAdapter`] across consecutive result pages.
pub struct PaginationWalker<'a, F, A> {
    fetcher: &'a F,
    adapter: &'a A,
    search_base: Url,
}

impl<'a, F, A> PaginationWalker<'a, F, A>
where
    F: PageFetch,
    A: SiteAdapter,
{
    /// `search_base` is what relative next-page links are resolved against.
    pub fn new(fetcher: &'a F, adapter: &'a A, search_base: Url) -> Self {
        Self {
            fetcher,
            adapter,
            search_base,
        }
    }

    /// Collect the sources of one image, in page-then-position order.
    ///
    /// At most `page_budget` pages are parsed. Duplicates are kept.
    ///
    /// # Errors
    ///
    /// Whatever the fetcher cannot recover from: a rejection by the search
    /// engine, an exhausted retry cap, or cancellation. Odd markup is never
    /// an error; it just ends the walk early.
    #[instrument(level = "info", skip(self, today))]
    pub async fn collect_sources(
        &self,
        image_url: &str,
        page_budget: usize,
        today: NaiveDate,
    ) -> Result<Vec<Source>> {
        let mut session = SearchSession::new(image_url, page_budget);
        if session.budget_spent() {
            return Ok(session.sources);
        }

        let first = self.fetcher.fetch(&session.target, true).await?;
        session.markup = match truncate_to_section(&first, self.adapter.section_marker()) {
            Some(section) => section.to_string(),
            None => {
                warn!(target = %session.target, "Matching-pages section not found");
                String::new()
            }
        };

        loop {
            let found = self.adapter.extract_sources(&session.markup, today);
            session.page += 1;
            info!(page = session.page, found = found.len(), "Search result page");
            session.sources.extend(found);

            if session.budget_spent() {
                debug!(budget = session.budget, "Page budget spent");
                break;
            }

            let Some(href) = self.adapter.next_page(&session.markup) else {
                debug!(page = session.page, "No further result page");
                break;
            };
            let next = match self.search_base.join(&href) {
                Ok(next) => next,
                Err(e) => {
                    warn!(%href, error = %e, "Unusable next-page link");
                    break;
                }
            };

            session.markup = self.fetcher.fetch(next.as_str(), false).await?;
        }

        info!(
            pages = session.page,
            sources = session.sources.len(),
            "Collected sources"
        );
        Ok(session.sources)
    }
}
