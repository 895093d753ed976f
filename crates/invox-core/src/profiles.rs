//! Built-in supplier profiles
//!
//! A profile is a hand-written regex ruleset for one supplier's invoice
//! layout. Profiles are the fastest and most reliable strategy, so the
//! pipeline tries them before any model call. They only fire when their
//! detection pattern finds the supplier's name in the acquired text.
//!
//! Suppliers drift their layouts between print runs, so a profile carries
//! three tiers per line: the primary pattern, fallback variants, and a
//! token heuristic for rows the marker identifies but no pattern fits.
//! [`generic_scan`] is the supplier-agnostic last text tier before the
//! model strategies.

use regex::Regex;

use crate::config::ExtractionConfig;
use crate::error::Result;
use crate::extract::{self, ItemDraft};
use crate::models::{
    ExtractionMethod, ExtractionResult, InvoiceMetadata, ProcessingRules,
};

/// Regex ruleset for one supplier's layout
pub struct SupplierProfile {
    pub key: &'static str,
    pub display_name: &'static str,
    detect: Regex,
    line: Regex,
    /// Cheap per-line check for "this row is an item", used to decide when
    /// the fallback tiers get a turn.
    marker: Option<Regex>,
    /// Known layout variants, tried in order when the primary misses a
    /// marker-matching line.
    fallback_lines: Vec<Regex>,
    invoice_number: Option<Regex>,
    date: Option<Regex>,
    pub rules: ProcessingRules,
}

impl SupplierProfile {
    pub fn matches(&self, text: &str) -> bool {
        self.detect.is_match(text)
    }

    /// Run the line tiers over the text and build the result
    ///
    /// Per line: primary pattern, then the fallback variants, then the
    /// whitespace-token heuristic. Fallbacks only run on lines the marker
    /// flags as item rows; anything else falling through to the heuristic
    /// would turn headers into phantom items.
    pub fn extract(&self, text: &str, config: &ExtractionConfig) -> ExtractionResult {
        let source = format!("profile:{}", self.key);
        let mut items = Vec::new();
        let mut matched_lines = Vec::new();

        for line in text.lines() {
            let draft = if let Some(caps) = self.line.captures(line) {
                Some(draft_from_captures(&caps))
            } else if self.marker.as_ref().is_some_and(|m| m.is_match(line)) {
                self.fallback_lines
                    .iter()
                    .find_map(|p| p.captures(line).map(|caps| draft_from_captures(&caps)))
                    .or_else(|| token_heuristic(line))
            } else {
                None
            };

            if let Some(draft) = draft {
                matched_lines.push(line.to_string());
                items.push(extract::finalize_item(draft, &self.rules, config, &source));
            }
        }

        let items = extract::dedup_items(items, config.limits.max_line_items);

        ExtractionResult {
            method: ExtractionMethod::TextPattern,
            supplier: self.display_name.to_string(),
            metadata: InvoiceMetadata {
                invoice_number: capture_first(&self.invoice_number, text),
                date: capture_first(&self.date, text),
                total_amount: None,
                total_excluding_tax: None,
                tax_amount: None,
                currency: Some(self.rules.currency.clone()),
            },
            line_items: items,
            raw_trace: matched_lines.join("\n"),
        }
    }
}

fn draft_from_captures(caps: &regex::Captures) -> ItemDraft {
    ItemDraft {
        code: caps.name("code").map(|m| m.as_str().to_string()),
        description: caps
            .name("description")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        quantity: caps.name("quantity").map(parse_num).unwrap_or(0.0),
        unit_price: caps.name("unit_price").map(parse_num).unwrap_or(0.0),
        discount_percent: caps.name("discount").map(parse_num).unwrap_or(0.0),
        reported_total: caps.name("total").map(parse_num),
    }
}

/// Last-resort parse of a known item row by whitespace tokens
///
/// Anchors on the pack-size separator token `x`: the token before it is the
/// quantity, the second token after it the unit price, with the code first
/// and the printed total last. Returns `None` when the shape does not hold;
/// a wrong guess here is worse than a missing row.
fn token_heuristic(line: &str) -> Option<ItemDraft> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let x = tokens.iter().position(|t| t.eq_ignore_ascii_case("x"))?;
    if x < 3 || tokens.len() < x + 3 {
        return None;
    }

    let quantity = parse_amount(tokens[x - 1])?;
    let unit_price = parse_amount(tokens[x + 2])?;
    let reported_total = tokens.last().and_then(|t| parse_amount(t));
    let discount_percent = tokens.get(x + 3).and_then(|t| parse_amount(t)).unwrap_or(0.0);

    Some(ItemDraft {
        code: Some(tokens[0].to_string()),
        description: tokens[1..x - 1].join(" "),
        quantity,
        unit_price,
        discount_percent,
        reported_total,
    })
}

fn capture_first(pattern: &Option<Regex>, text: &str) -> Option<String> {
    pattern
        .as_ref()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

fn parse_num(m: regex::Match) -> f64 {
    m.as_str().replace(',', ".").parse().unwrap_or(0.0)
}

/// Parse a money or quantity token, tolerating a currency prefix and a
/// comma decimal separator
fn parse_amount(token: &str) -> Option<f64> {
    let trimmed = token.trim_start_matches('R').replace(',', ".");
    trimmed.parse().ok().filter(|n: &f64| n.is_finite())
}

/// Supplier-agnostic line scan over any acquired text
///
/// Finds rows that look like item lines (at least two price-shaped tokens,
/// no header/footer keywords) and reads them positionally: quantity first,
/// unit price second to last, printed total last. Used when no learned
/// algorithm or profile produced anything, before any model is called.
pub fn generic_scan(text: &str, supplier: &str, config: &ExtractionConfig) -> ExtractionResult {
    const SKIP_WORDS: &[&str] = &[
        "invoice", "total", "subtotal", "vat", "tax", "page", "date", "account", "balance",
        "terms", "thank",
    ];

    let rules = ProcessingRules {
        currency: config.money.default_currency.clone(),
        tax_rate: config.money.default_tax_rate,
        prices_include_tax: false,
        has_discounts: false,
        date_format: None,
    };

    let mut items = Vec::new();
    let mut matched_lines = Vec::new();

    for line in text.lines() {
        let lowered = line.to_lowercase();
        if SKIP_WORDS.iter().any(|w| lowered.contains(w)) {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let prices: Vec<f64> = tokens.iter().filter_map(|t| parse_price(t)).collect();
        if prices.len() < 2 {
            continue;
        }

        let numbers: Vec<f64> = tokens.iter().filter_map(|t| parse_amount(t)).collect();
        let quantity = if numbers.len() >= 3 { numbers[0] } else { 1.0 };
        let unit_price = prices[prices.len() - 2];
        let reported_total = prices.last().copied();

        let description: String = tokens
            .iter()
            .enumerate()
            .filter(|(i, t)| parse_amount(t).is_none() && !(*i == 0 && looks_like_code(t)))
            .map(|(_, t)| *t)
            .collect::<Vec<_>>()
            .join(" ");
        let code = tokens
            .first()
            .filter(|t| looks_like_code(t))
            .map(|t| t.to_string());

        matched_lines.push(line.to_string());
        items.push(extract::finalize_item(
            ItemDraft {
                code,
                description,
                quantity,
                unit_price,
                discount_percent: 0.0,
                reported_total,
            },
            &rules,
            config,
            "generic-scan",
        ));
    }

    let items = extract::dedup_items(items, config.limits.max_line_items);

    ExtractionResult {
        method: ExtractionMethod::TextPattern,
        supplier: supplier.to_string(),
        metadata: InvoiceMetadata {
            currency: Some(rules.currency),
            ..Default::default()
        },
        line_items: items,
        raw_trace: matched_lines.join("\n"),
    }
}

/// A token shaped like money: optional currency prefix, two decimals
fn parse_price(token: &str) -> Option<f64> {
    let stripped = token.trim_start_matches('R');
    let (_, decimals) = stripped.split_once(['.', ','])?;
    if decimals.len() != 2 || !decimals.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    parse_amount(token)
}

/// Product codes carry at least one digit and nothing but alphanumerics,
/// dashes and slashes
fn looks_like_code(token: &str) -> bool {
    token.len() >= 2
        && token.bytes().any(|b| b.is_ascii_digit())
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'/')
}

/// The compiled set of built-in profiles
pub struct BuiltinProfiles {
    profiles: Vec<SupplierProfile>,
}

impl BuiltinProfiles {
    pub fn new() -> Result<Self> {
        Ok(Self {
            profiles: vec![medis()?],
        })
    }

    /// Find the first profile whose detection pattern matches the text
    pub fn find(&self, text: &str) -> Option<&SupplierProfile> {
        self.profiles.iter().find(|p| p.matches(text))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SupplierProfile> {
        self.profiles.iter()
    }
}

/// Medis (Pty) Ltd
///
/// Primary line layout:
/// `CODE DESCRIPTION QTY x PACK UNIT_PRICE DISCOUNT% RTAX RTOTAL`
///
/// The fallback covers the "Each" variant some print runs use instead of
/// the `x PACK` column.
fn medis() -> Result<SupplierProfile> {
    Ok(SupplierProfile {
        key: "medis",
        display_name: "Medis",
        detect: Regex::new(r"(?i)\bmedis\b")?,
        line: Regex::new(
            r"^(?P<code>[A-Z]-\d{5}-\d+[A-Z]?)\s+(?P<description>.+?)\s+(?P<quantity>\d+(?:\.\d+)?)\s+x\s+\d+\s+(?P<unit_price>\d+(?:[.,]\d+)?)\s+(?P<discount>\d+(?:[.,]\d+)?)\s+R(?P<tax>\d+(?:[.,]\d+)?)\s+R(?P<total>\d+(?:[.,]\d+)?)\s*$",
        )?,
        marker: Some(Regex::new(r"^[A-Z]-\d{5}-\d+[A-Z]?\b")?),
        fallback_lines: vec![Regex::new(
            r"^(?P<code>[A-Z]-\d{5}-\d+[A-Z]?)\s+(?P<description>.+?)\s+(?P<quantity>\d+(?:\.\d+)?)\s+Each\s+(?P<unit_price>\d+(?:[.,]\d+)?)\s+(?P<discount>\d+(?:[.,]\d+)?)\s+R?(?P<total>\d+(?:[.,]\d+)?)\s*$",
        )?],
        invoice_number: Some(Regex::new(
            r"(?i)invoice\s*(?:no|number|#)?\s*[:.]?\s*([A-Z]{2,3}[-/]?\d+)",
        )?),
        date: Some(Regex::new(r"\b(\d{4}[/-]\d{2}[/-]\d{2}|\d{2}[/-]\d{2}[/-]\d{4})\b")?),
        rules: ProcessingRules {
            currency: "ZAR".into(),
            tax_rate: 15.0,
            prices_include_tax: false,
            has_discounts: true,
            date_format: None,
        },
    })
}
