//! Fact-check classification of an image's sources.
//!
//! # Flow
//!
//! 1. [`is_fact_checked`] cheaply tells whether any source belongs to a known
//!    fact-checking site, so callers can skip images that have none
//! 2. [`FactCheckDispatcher::classify`] takes, for every registered site, the
//!    first matching source and asks the [`ClassificationCache`] for its
//!    verdict, fetching and extracting only on a miss
//!
//! Extractors are looked up in a [`Registry`] keyed by [`FactChecker`], so tests
//! can swap any of them out.

pub mod cache;
pub mod extractors;

use crate::error::{CrawlError, Result};
use crate::fetch::{PageFetch, normalize_url};
use crate::models::{FactChecker, Source, Verdict, VerdictMap};
use cache::{ClassificationCache, MemoryStore, VerdictStore};
use extractors::VerdictExtractor;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// True if any source link contains a known fact-checker signature.
pub fn is_fact_checked(sources: &[Source]) -> bool {
    sources
        .iter()
        .any(|s| FactChecker::ALL.iter().any(|c| c.matches(&s.link)))
}

/// Fact-checker → extractor.
pub struct Registry {
    extractors: BTreeMap<FactChecker, Box<dyn VerdictExtractor>>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            extractors: BTreeMap::new(),
        }
    }

    /// Every site this crate knows how to read.
    pub fn standard() -> Self {
        Self::empty()
            .register(Box::new(extractors::Boatos))
            .register(Box::new(extractors::EFarsas))
            .register(Box::new(extractors::AosFatos))
            .register(Box::new(extractors::FatoOuFake))
            .register(Box::new(extractors::Lupa))
    }

    /// Add an extractor, replacing any previous one for the same site.
    pub fn register(mut self, extractor: Box<dyn VerdictExtractor>) -> Self {
        self.extractors.insert(extractor.checker(), extractor);
        self
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&FactChecker, &dyn VerdictExtractor)> {
        self.extractors.iter().map(|(c, e)| (c, e.as_ref()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Classifies source lists against the registered fact-checking sites.
pub struct FactCheckDispatcher<'a, F, S = MemoryStore> {
    fetcher: &'a F,
    registry: Registry,
    cache: ClassificationCache<S>,
}

impl<'a, F, S> FactCheckDispatcher<'a, F, S>
where
    F: PageFetch,
    S: VerdictStore,
{
    pub fn new(fetcher: &'a F, registry: Registry, cache: ClassificationCache<S>) -> Self {
        if registry.is_empty() {
            warn!("No verdict extractors registered; every image gets an empty verdict map");
        }
        Self {
            fetcher,
            registry,
            cache,
        }
    }

    pub fn cache(&self) -> &ClassificationCache<S> {
        &self.cache
    }

    /// One verdict per registered site that has a matching source.
    ///
    /// Only the first matching source of each site is considered.
    ///
    /// # Errors
    ///
    /// Fetch failures the fetcher could not absorb (cancellation, exhausted
    /// retries). A fact-check site answering with an HTTP error is recorded
    /// as [`Verdict::Unknown`] instead.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn classify(&self, sources: &[Source]) -> Result<VerdictMap> {
        let mut verdicts = VerdictMap::new();

        for (checker, extractor) in self.registry.iter() {
            let Some(source) = sources.iter().find(|s| checker.matches(&s.link)) else {
                continue;
            };
            let link = source.link.as_str();
            let verdict = self
                .cache
                .get_or_classify(link, || self.extract(extractor, link))
                .await?;
            info!(%checker, %link, ?verdict, "Fact-check verdict");
            verdicts.insert(*checker, verdict);
        }

        Ok(verdicts)
    }

    async fn extract(&self, extractor: &dyn VerdictExtractor, link: &str) -> Result<Verdict> {
        let target = normalize_url(link);
        let accepted = Url::parse(&target)
            .map(|url| extractor.accepts(&url))
            .unwrap_or(false);
        if !accepted {
            debug!(%link, "Not a fact-check article; skipping fetch");
            return Ok(Verdict::Unknown);
        }

        match self.fetcher.fetch(&target, false).await {
            Ok(markup) => Ok(extractor.verdict(&markup)),
            Err(CrawlError::Rejected { status, .. }) => {
                warn!(%link, status, "Fact-check page refused; verdict unknown");
                Ok(Verdict::Unknown)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves canned markup and counts fetches per URL.
    #[derive(Default)]
    struct CountingFetcher {
        pages: HashMap<String, String>,
        fetched: Mutex<Vec<String>>,
        reject: bool,
        latency: Option<Duration>,
    }

    impl CountingFetcher {
        fn with(mut self, url: &str, markup: &str) -> Self {
            self.pages.insert(url.to_string(), markup.to_string());
            self
        }

        fn fetch_count(&self) -> usize {
            self.fetched.lock().unwrap().len()
        }
    }

    impl PageFetch for CountingFetcher {
        async fn fetch(&self, url: &str, _rewrite_time_window: bool) -> Result<String> {
            self.fetched.lock().unwrap().push(url.to_string());
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if self.reject {
                return Err(CrawlError::Rejected {
                    url: url.to_string(),
                    status: 404,
                });
            }
            Ok(self.pages.get(url).cloned().unwrap_or_default())
        }
    }

    /// Extractor that records how often it is asked for a verdict.
    struct SpyExtractor {
        checker: FactChecker,
        calls: Arc<AtomicUsize>,
    }

    impl VerdictExtractor for SpyExtractor {
        fn checker(&self) -> FactChecker {
            self.checker
        }

        fn accepts(&self, _link: &Url) -> bool {
            true
        }

        fn verdict(&self, _markup: &str) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Verdict::False
        }
    }

    fn spy_registry() -> (Registry, HashMap<FactChecker, Arc<AtomicUsize>>) {
        let mut counters = HashMap::new();
        let mut registry = Registry::empty();
        for checker in FactChecker::ALL {
            let calls = Arc::new(AtomicUsize::new(0));
            counters.insert(checker, Arc::clone(&calls));
            registry = registry.register(Box::new(SpyExtractor { checker, calls }));
        }
        (registry, counters)
    }

    const BOATOS_PAGE: &str = r#"<h1 class="entry-title">Foto de x #boato</h1>"#;

    #[test]
    fn test_is_fact_checked() {
        let sources = vec![
            Source::new("http://example.com/a", ""),
            Source::new("https://www.facebook.com/post/1", "2019-01-01"),
            Source::new("https://www.e-farsas.com/foto-falsa.html", ""),
            Source::new("https://twitter.com/x/status/1", ""),
        ];
        assert!(is_fact_checked(&sources));
        assert!(!is_fact_checked(&sources[..2]));
        assert!(!is_fact_checked(&[]));
    }

    #[test]
    fn test_standard_registry_covers_every_checker() {
        assert_eq!(Registry::standard().len(), FactChecker::ALL.len());
    }

    #[tokio::test]
    async fn test_only_matching_extractor_runs() {
        let fetcher = CountingFetcher::default().with("http://boatos.org/x", BOATOS_PAGE);
        let (registry, counters) = spy_registry();
        let dispatcher =
            FactCheckDispatcher::new(&fetcher, registry, ClassificationCache::default());

        let sources = vec![
            Source::new("http://boatos.org/x", ""),
            Source::new("http://example.com", ""),
        ];
        let verdicts = dispatcher.classify(&sources).await.unwrap();

        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts.get(&FactChecker::Boatos), Some(&Verdict::False));
        assert_eq!(counters[&FactChecker::Boatos].load(Ordering::SeqCst), 1);
        for checker in FactChecker::ALL.iter().filter(|c| **c != FactChecker::Boatos) {
            assert_eq!(counters[checker].load(Ordering::SeqCst), 0);
        }
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_link_across_images_fetches_once() {
        let fetcher = CountingFetcher::default().with("http://boatos.org/x", BOATOS_PAGE);
        let dispatcher =
            FactCheckDispatcher::new(&fetcher, Registry::standard(), ClassificationCache::default());

        let first_image = vec![Source::new("http://boatos.org/x", "2019-02-01")];
        let second_image = vec![
            Source::new("http://other.com/y", ""),
            Source::new("http://boatos.org/x", ""),
        ];

        let a = dispatcher.classify(&first_image).await.unwrap();
        let b = dispatcher.classify(&second_image).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.get(&FactChecker::Boatos), Some(&Verdict::False));
        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(dispatcher.cache().hits(), 1);
        assert_eq!(dispatcher.cache().misses(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_images_sharing_a_link_fetch_once() {
        let fetcher = CountingFetcher {
            latency: Some(Duration::from_millis(20)),
            ..CountingFetcher::default().with("http://boatos.org/x", BOATOS_PAGE)
        };
        let dispatcher =
            FactCheckDispatcher::new(&fetcher, Registry::standard(), ClassificationCache::default());

        let first_image = vec![Source::new("http://boatos.org/x", "")];
        let second_image = vec![
            Source::new("http://example.com/z", ""),
            Source::new("http://boatos.org/x", "2019-05-05"),
        ];
        let (a, b) = tokio::join!(
            dispatcher.classify(&first_image),
            dispatcher.classify(&second_image),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(dispatcher.cache().misses(), 1);
    }

    #[tokio::test]
    async fn test_empty_registry_classifies_nothing() {
        let fetcher = CountingFetcher::default();
        let dispatcher =
            FactCheckDispatcher::new(&fetcher, Registry::empty(), ClassificationCache::default());
        let verdicts = dispatcher
            .classify(&[Source::new("http://boatos.org/x", "")])
            .await
            .unwrap();
        assert!(verdicts.is_empty());
        assert_eq!(fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let fetcher = CountingFetcher::default()
            .with("http://boatos.org/first", BOATOS_PAGE)
            .with("http://boatos.org/second", r#"<h1 class="entry-title">x #verdade</h1>"#);
        let dispatcher =
            FactCheckDispatcher::new(&fetcher, Registry::standard(), ClassificationCache::default());

        let sources = vec![
            Source::new("http://boatos.org/first", ""),
            Source::new("http://boatos.org/second", ""),
        ];
        let verdicts = dispatcher.classify(&sources).await.unwrap();
        assert_eq!(verdicts.get(&FactChecker::Boatos), Some(&Verdict::False));
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_structural_reject_skips_fetch() {
        let fetcher = CountingFetcher::default();
        let dispatcher =
            FactCheckDispatcher::new(&fetcher, Registry::standard(), ClassificationCache::default());

        let sources = vec![
            Source::new("http://www.boatos.org/", ""),
            Source::new("https://g1.globo.com/fato-ou-fake/", ""),
        ];
        let verdicts = dispatcher.classify(&sources).await.unwrap();
        assert_eq!(verdicts.get(&FactChecker::Boatos), Some(&Verdict::Unknown));
        assert_eq!(verdicts.get(&FactChecker::FatoOuFake), Some(&Verdict::Unknown));
        assert_eq!(fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_several_checkers_in_one_image() {
        let fetcher = CountingFetcher::default()
            .with("http://boatos.org/x", BOATOS_PAGE)
            .with(
                "https://piaui.folha.uol.com.br/lupa/2018/x/",
                r#"<div class="etiqueta">Verdadeiro</div>"#,
            )
            .with("https://www.e-farsas.com/y.html", "<p>sem etiqueta</p>");
        let dispatcher =
            FactCheckDispatcher::new(&fetcher, Registry::standard(), ClassificationCache::default());

        let sources = vec![
            Source::new("https://piaui.folha.uol.com.br/lupa/2018/x/", ""),
            Source::new("http://boatos.org/x", ""),
            Source::new("https://www.e-farsas.com/y.html", ""),
        ];
        let verdicts = dispatcher.classify(&sources).await.unwrap();
        assert_eq!(verdicts.get(&FactChecker::Boatos), Some(&Verdict::False));
        assert_eq!(verdicts.get(&FactChecker::Lupa), Some(&Verdict::True));
        assert_eq!(verdicts.get(&FactChecker::EFarsas), Some(&Verdict::Unknown));
        assert!(verdicts.get(&FactChecker::AosFatos).is_none());
    }

    #[tokio::test]
    async fn test_refused_fact_check_page_is_unknown() {
        let fetcher = CountingFetcher {
            reject: true,
            ..CountingFetcher::default()
        };
        let dispatcher =
            FactCheckDispatcher::new(&fetcher, Registry::standard(), ClassificationCache::default());
        let verdicts = dispatcher
            .classify(&[Source::new("http://boatos.org/x", "")])
            .await
            .unwrap();
        assert_eq!(verdicts.get(&FactChecker::Boatos), Some(&Verdict::Unknown));
    }
}
