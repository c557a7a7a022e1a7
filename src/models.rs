//! Data models for images, the sources they were found on and fact-check verdicts.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Image`]: one entry of a batch file, enriched in place by the crawler
//! - [`Source`]: a page an image appeared on, with its publication date
//! - [`FactChecker`], [`Verdict`], [`VerdictMap`]: fact-check classification results
//!
//! Batch files use camelCase keys for the fields they were created with
//! (`imageID`, `shareNumber`), hence the `#[allow(non_snake_case)]` attribute.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A batch file: positional image number → image.
pub type Batch = BTreeMap<u64, Image>;

/// One image of a batch file.
///
/// Fields the crawler does not know about are kept in `extra` and written
/// back unchanged.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Image {
    /// Opaque id; the last path segment of the hosted image URL.
    pub imageID: String,
    /// How many times the image was shared. Callers skip rarely shared images.
    pub shareNumber: i64,
    /// Pages the image appeared on, in discovery order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    /// Whether any source belongs to a known fact-checking site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_check: Option<VerdictMap>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A page on which an image appeared.
///
/// Serialized as a two-element array `[link, date]`; `date` is `YYYY-MM-DD`
/// or empty when the result page did not show one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Source {
    pub link: String,
    pub published: String,
}

impl Source {
    pub fn new(link: impl Into<String>, published: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            published: published.into(),
        }
    }

    pub fn has_date(&self) -> bool {
        !self.published.is_empty()
    }

    /// Site name of the link, without subdomains or public suffix.
    ///
    /// For example: `https://www.boatos.org/x` -> `boatos`,
    /// `https://piaui.folha.uol.com.br/lupa` -> `uol`.
    ///
    /// Suffixes are recognised by shape, not looked up: a two-letter country
    /// code preceded by a generic label (`com.br`, `gov.br`, `co.uk`, `ac.jp`)
    /// counts as one suffix. That covers the Brazilian sites the crawler
    /// meets; exotic registries (`pvt.k12.ma.us`) come out one label short.
    pub fn domain(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.link).ok()?;
        let host = parsed.host_str()?;
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() < 2 {
            return None;
        }
        let last = parts[parts.len() - 1];
        let second = parts[parts.len() - 2];
        // second-level suffixes such as com.br, gov.br or co.uk
        let second_level = last.len() == 2
            && matches!(
                second,
                "com" | "org" | "gov" | "net" | "edu" | "blog" | "jus" | "co" | "ac"
            );
        if second_level && parts.len() >= 3 {
            Some(parts[parts.len() - 3].to_string())
        } else {
            Some(second.to_string())
        }
    }
}

impl From<(String, String)> for Source {
    fn from((link, published): (String, String)) -> Self {
        Self { link, published }
    }
}

impl From<Source> for (String, String) {
    fn from(source: Source) -> Self {
        (source.link, source.published)
    }
}

/// Known fact-checking sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum FactChecker {
    #[serde(rename = "boatos.org")]
    Boatos,
    #[serde(rename = "e-farsas.com")]
    EFarsas,
    #[serde(rename = "aosfatos.org")]
    AosFatos,
    #[serde(rename = "fato-ou-fake")]
    FatoOuFake,
    #[serde(rename = "lupa")]
    Lupa,
}

impl FactChecker {
    pub const ALL: [FactChecker; 5] = [
        FactChecker::Boatos,
        FactChecker::EFarsas,
        FactChecker::AosFatos,
        FactChecker::FatoOuFake,
        FactChecker::Lupa,
    ];

    /// Substring that identifies a link as belonging to this site.
    pub fn signature(&self) -> &'static str {
        match self {
            FactChecker::Boatos => "boatos.org",
            FactChecker::EFarsas => "e-farsas.com",
            FactChecker::AosFatos => "aosfatos.org",
            FactChecker::FatoOuFake => "g1.globo.com/fato-ou-fake",
            FactChecker::Lupa => "piaui.folha.uol.com.br/lupa",
        }
    }

    pub fn matches(&self, link: &str) -> bool {
        link.contains(self.signature())
    }
}

impl fmt::Display for FactChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FactChecker::Boatos => "boatos.org",
            FactChecker::EFarsas => "e-farsas.com",
            FactChecker::AosFatos => "aosfatos.org",
            FactChecker::FatoOuFake => "fato-ou-fake",
            FactChecker::Lupa => "lupa",
        };
        f.write_str(name)
    }
}

/// Outcome of reading a fact-check page.
///
/// Serialized as `true`, `false` or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Verdict {
    /// The site confirmed the content as genuine.
    True,
    /// The site flagged the content as false.
    False,
    /// The page did not have the expected verdict markup.
    Unknown,
}

impl From<Option<bool>> for Verdict {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Verdict::True,
            Some(false) => Verdict::False,
            None => Verdict::Unknown,
        }
    }
}

impl From<Verdict> for Option<bool> {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::True => Some(true),
            Verdict::False => Some(false),
            Verdict::Unknown => None,
        }
    }
}

/// One verdict per fact-checker that had a matching source.
pub type VerdictMap = BTreeMap<FactChecker, Verdict>;
