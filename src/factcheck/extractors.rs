//! One verdict extractor per fact-checking site.
//!
//! Each extractor does two things: rule out links that cannot be a single
//! fact-check article (site roots, section and tag indexes) without touching
//! the network, and read the verdict from one fixed piece of markup. No
//! extractor reads free text beyond matching its fixed token or label.
//!
//! | Site | Verdict markup | False | True |
//! |------|----------------|-------|------|
//! | boatos.org | `h1.entry-title` | `#boato` | `#verdade` |
//! | e-farsas.com | `a[rel~=category]` label | `falso` | `verdadeiro` |
//! | aosfatos.org | `figure.stamp figcaption` | `falso` | `verdadeiro` |
//! | g1 Fato ou Fake | `h1` / `h2` headline | `#fake` | `#fato` |
//! | Lupa | `div.etiqueta` | `falso` | `verdadeiro` |

use crate::models::{FactChecker, Verdict};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

static BOATOS_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h1.entry-title").unwrap());
static EFARSAS_CATEGORY: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[rel~="category"]"#).unwrap());
static AOSFATOS_STAMP: Lazy<Selector> =
    Lazy::new(|| Selector::parse("figure.stamp figcaption").unwrap());
static G1_HEADLINE: Lazy<Selector> = Lazy::new(|| Selector::parse("h1, h2").unwrap());
static LUPA_LABEL: Lazy<Selector> = Lazy::new(|| Selector::parse("div.etiqueta").unwrap());

/// Reads a verdict off one fact-checking site's article pages.
pub trait VerdictExtractor: Send + Sync {
    fn checker(&self) -> FactChecker;

    /// Whether `link` can be a fact-check article at all. Links rejected
    /// here get an unknown verdict without being fetched.
    fn accepts(&self, link: &Url) -> bool;

    fn verdict(&self, markup: &str) -> Verdict;
}

fn is_root(link: &Url) -> bool {
    link.path().trim_matches('/').is_empty()
}

fn under_any(link: &Url, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| link.path().starts_with(p))
}

/// Trimmed, lowercased text of every element matching `selector`.
fn texts(document: &Html, selector: &Selector) -> Vec<String> {
    document
        .select(selector)
        .map(|el| el.text().collect::<String>().trim().to_lowercase())
        .collect()
}

/// First label that is exactly `falso` or `verdadeiro`.
fn label_verdict(labels: &[String]) -> Verdict {
    labels
        .iter()
        .find_map(|label| match label.as_str() {
            "falso" => Some(Verdict::False),
            "verdadeiro" => Some(Verdict::True),
            _ => None,
        })
        .unwrap_or(Verdict::Unknown)
}

/// First text carrying one of the two tokens; the false token wins a tie.
fn token_verdict(texts: &[String], false_token: &str, true_token: &str) -> Verdict {
    texts
        .iter()
        .find_map(|text| {
            if text.contains(false_token) {
                Some(Verdict::False)
            } else if text.contains(true_token) {
                Some(Verdict::True)
            } else {
                None
            }
        })
        .unwrap_or(Verdict::Unknown)
}

#[derive(Debug, Default)]
pub struct Boatos;

impl VerdictExtractor for Boatos {
    fn checker(&self) -> FactChecker {
        FactChecker::Boatos
    }

    fn accepts(&self, link: &Url) -> bool {
        !is_root(link) && !under_any(link, &["/category/", "/tag/", "/page/", "/author/"])
    }

    fn verdict(&self, markup: &str) -> Verdict {
        let document = Html::parse_document(markup);
        token_verdict(&texts(&document, &BOATOS_TITLE), "#boato", "#verdade")
    }
}

#[derive(Debug, Default)]
pub struct EFarsas;

impl VerdictExtractor for EFarsas {
    fn checker(&self) -> FactChecker {
        FactChecker::EFarsas
    }

    fn accepts(&self, link: &Url) -> bool {
        !is_root(link) && !under_any(link, &["/secoes/", "/category/", "/tag/"])
    }

    fn verdict(&self, markup: &str) -> Verdict {
        let document = Html::parse_document(markup);
        label_verdict(&texts(&document, &EFARSAS_CATEGORY))
    }
}

#[derive(Debug, Default)]
pub struct AosFatos;

impl VerdictExtractor for AosFatos {
    fn checker(&self) -> FactChecker {
        FactChecker::AosFatos
    }

    fn accepts(&self, link: &Url) -> bool {
        let path = link.path().trim_matches('/');
        !is_root(link) && path != "noticias" && !under_any(link, &["/checamos/"])
    }

    fn verdict(&self, markup: &str) -> Verdict {
        let document = Html::parse_document(markup);
        label_verdict(&texts(&document, &AOSFATOS_STAMP))
    }
}

#[derive(Debug, Default)]
pub struct FatoOuFake;

impl VerdictExtractor for FatoOuFake {
    fn checker(&self) -> FactChecker {
        FactChecker::FatoOuFake
    }

    fn accepts(&self, link: &Url) -> bool {
        under_any(link, &["/fato-ou-fake/"]) && link.path().trim_matches('/') != "fato-ou-fake"
    }

    fn verdict(&self, markup: &str) -> Verdict {
        let document = Html::parse_document(markup);
        token_verdict(&texts(&document, &G1_HEADLINE), "#fake", "#fato")
    }
}

#[derive(Debug, Default)]
pub struct Lupa;

impl VerdictExtractor for Lupa {
    fn checker(&self) -> FactChecker {
        FactChecker::Lupa
    }

    fn accepts(&self, link: &Url) -> bool {
        under_any(link, &["/lupa/"])
            && link.path().trim_matches('/') != "lupa"
            && !under_any(link, &["/lupa/categoria/"])
    }

    fn verdict(&self, markup: &str) -> Verdict {
        let document = Html::parse_document(markup);
        label_verdict(&texts(&document, &LUPA_LABEL))
    }
}
