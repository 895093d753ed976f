//! Catalog product matching
//!
//! Maps an extracted line item onto the product catalog so the user
//! confirms a suggestion instead of searching by hand. An exact SKU hit
//! short-circuits; otherwise plain token overlap with a synonym table.
//! Descriptions are short and OCR-noisy, so anything fancier than
//! bag-of-words has not earned its keep.

use std::collections::{HashMap, HashSet};

use crate::models::{CatalogItem, ProductMatch, ProductSuggestions};

/// How many suggestions to return in total (best + alternates)
const MAX_SUGGESTIONS: usize = 5;

/// Score added per token that matched through the synonym table
const SYNONYM_BONUS: f64 = 0.1;

/// Minimum score for a suggestion to be offered at all
const MIN_SCORE: f64 = 0.3;

/// Read-only view of the external product catalog
pub trait Catalog: Send + Sync {
    fn item_by_sku(&self, sku: &str) -> Option<CatalogItem>;
    fn all_items(&self) -> Vec<CatalogItem>;
}

/// In-memory catalog, used by the CLI and in tests
pub struct MemoryCatalog {
    items: Vec<CatalogItem>,
}

impl MemoryCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }
}

impl Catalog for MemoryCatalog {
    fn item_by_sku(&self, sku: &str) -> Option<CatalogItem> {
        self.items
            .iter()
            .find(|i| i.sku.eq_ignore_ascii_case(sku))
            .cloned()
    }

    fn all_items(&self) -> Vec<CatalogItem> {
        self.items.clone()
    }
}

pub struct ProductMatcher {
    catalog: Box<dyn Catalog>,
    tokenized: Vec<(CatalogItem, HashSet<String>)>,
    synonyms: HashMap<String, String>,
}

impl ProductMatcher {
    pub fn new(catalog: Box<dyn Catalog>) -> Self {
        Self::with_synonyms(catalog, default_synonyms())
    }

    pub fn with_synonyms(catalog: Box<dyn Catalog>, synonyms: HashMap<String, String>) -> Self {
        let tokenized = catalog
            .all_items()
            .into_iter()
            .map(|item| {
                let mut tokens = tokenize(&item.name, &synonyms);
                if let Some(ref description) = item.description {
                    tokens.extend(tokenize(description, &synonyms));
                }
                (item, tokens)
            })
            .collect();
        Self {
            catalog,
            tokenized,
            synonyms,
        }
    }

    /// Rank catalog items against an extracted line item
    ///
    /// An exact SKU lookup on the item's code wins outright. Otherwise the
    /// description is scored against every catalog item; the best match
    /// plus up to four alternates are returned, all above the minimum
    /// score. An empty catalog or a hopeless description yields empty
    /// suggestions, never an error.
    pub fn suggest(&self, code: Option<&str>, description: &str) -> ProductSuggestions {
        if let Some(code) = code {
            if let Some(item) = self.catalog.item_by_sku(code) {
                return ProductSuggestions {
                    best: Some(ProductMatch { item, score: 1.0 }),
                    alternates: Vec::new(),
                };
            }
        }

        let query = tokenize(description, &self.synonyms);
        if query.is_empty() {
            return ProductSuggestions::default();
        }

        let mut scored: Vec<ProductMatch> = self
            .tokenized
            .iter()
            .filter_map(|(item, tokens)| {
                let score = self.score(&query, tokens);
                (score > MIN_SCORE).then(|| ProductMatch {
                    item: item.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(MAX_SUGGESTIONS);

        let mut iter = scored.into_iter();
        ProductSuggestions {
            best: iter.next(),
            alternates: iter.collect(),
        }
    }

    fn score(&self, query: &HashSet<String>, candidate: &HashSet<String>) -> f64 {
        if candidate.is_empty() {
            return 0.0;
        }

        let common = query.intersection(candidate).count() as f64;
        // Dice coefficient over the token sets.
        let mut score = 2.0 * common / (query.len() + candidate.len()) as f64;

        let synonym_hits = query
            .iter()
            .filter(|t| self.synonyms.values().any(|canonical| canonical == *t))
            .filter(|t| candidate.contains(*t))
            .count();
        score += SYNONYM_BONUS * synonym_hits as f64;

        score.min(1.0)
    }
}

/// Lowercase, canonicalize synonyms, then drop punctuation, stop-words
/// and tokens of two characters or fewer.
fn tokenize(text: &str, synonyms: &HashMap<String, String>) -> HashSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .map(|t| synonyms.get(&t).cloned().unwrap_or(t))
        .filter(|t| t.len() > 2)
        .filter(|t| !is_stopword(t))
        .collect()
}

fn is_stopword(token: &str) -> bool {
    matches!(token, "the" | "and" | "for" | "with" | "per" | "size")
}

/// Abbreviations and trade terms that supplier invoices use and the
/// catalog spells out
fn default_synonyms() -> HashMap<String, String> {
    [
        ("lge", "large"),
        ("lg", "large"),
        ("sml", "small"),
        ("sm", "small"),
        ("med", "medium"),
        ("pk", "pack"),
        ("pkt", "pack"),
        ("tabs", "tablets"),
        ("caps", "capsules"),
        ("bndg", "bandage"),
        ("asst", "assorted"),
        ("hallux", "bunion"),
        ("valgus", "bunion"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}
