//! Extraction pipeline
//!
//! Runs the strategy cascade over one uploaded invoice:
//!
//! 1. vision model over the page image, when a backend is configured and
//!    reachable; vision failures never fail the upload
//! 2. learned algorithm (if this supplier has been trained)
//! 3. built-in supplier profile
//! 4. supplier-agnostic line scan over the acquired text
//! 5. generic text model over the acquired text
//!
//! A strategy "wins" by producing at least one valid line item; anything
//! less falls through. A supplier with neither a stored algorithm nor a
//! profile gets `NeedsTraining` before the text tiers run, so the caller
//! starts a training session instead of burning model calls on a layout
//! nobody has described yet. Strategies run strictly one after another;
//! there is no speculative fan-out.
//!
//! When a product catalog is attached, every extracted item leaves with
//! catalog suggestions, whichever tier produced it.

use tracing::{debug, info, warn};

use crate::acquire;
use crate::ai::{ModelBackend, ModelClient};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::extract::{text_ai, vision};
use crate::learn::LearningManager;
use crate::matcher::{Catalog, ProductMatcher};
use crate::models::{
    ExtractionResult, InvoiceDocument, LearnedAlgorithm, ProcessOutcome, TrainingAnnotations,
    TrainingReport, TrainingSession,
};
use crate::profiles::{self, BuiltinProfiles};
use crate::prompts::PromptLibrary;

pub struct Pipeline {
    client: ModelClient,
    config: ExtractionConfig,
    prompts: PromptLibrary,
    profiles: BuiltinProfiles,
    learning: LearningManager,
    matcher: Option<ProductMatcher>,
}

impl Pipeline {
    pub fn new(
        client: ModelClient,
        learning: LearningManager,
        config: ExtractionConfig,
    ) -> Result<Self> {
        Ok(Self {
            client,
            config,
            prompts: PromptLibrary::new(),
            profiles: BuiltinProfiles::new()?,
            learning,
            matcher: None,
        })
    }

    pub fn learning(&self) -> &LearningManager {
        &self.learning
    }

    pub fn client(&self) -> &ModelClient {
        &self.client
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Prompt library shared by all strategies; training needs it too.
    pub fn prompts_mut(&mut self) -> &mut PromptLibrary {
        &mut self.prompts
    }

    /// Attach a product catalog; from here on every extracted item carries
    /// catalog suggestions.
    pub fn set_catalog(&mut self, catalog: Box<dyn Catalog>) {
        self.matcher = Some(ProductMatcher::new(catalog));
    }

    /// Process one uploaded invoice file
    pub async fn process(&mut self, doc: &InvoiceDocument) -> Result<ProcessOutcome> {
        if self.client.health_check().await {
            if let Some(result) = self.try_vision(doc).await {
                return self.extracted(result);
            }
            debug!("Vision produced nothing usable, trying the text tiers");
        } else {
            debug!(host = %self.client.host(), "Model backend unreachable, skipping vision");
        }

        let acquired = acquire::acquire_text(doc, &self.config.limits).await?;
        debug!(
            source = ?acquired.source,
            chars = acquired.text.len(),
            "Acquired invoice text"
        );
        self.process_text(&acquired.text, doc.supplier_hint.as_deref())
            .await
    }

    /// Train a supplier algorithm from annotated examples and persist it
    pub async fn train(
        &mut self,
        session: &TrainingSession,
        annotations: &TrainingAnnotations,
    ) -> Result<(LearnedAlgorithm, TrainingReport)> {
        let client = self.client.clone();
        let config = self.config.clone();
        self.learning
            .train(session, annotations, &client, &mut self.prompts, &config)
            .await
    }

    /// Run the text-based tiers over already-acquired text
    ///
    /// Vision is not attempted here; [`process`](Self::process) runs it
    /// first when the original document is at hand.
    pub async fn process_text(
        &mut self,
        text: &str,
        supplier_hint: Option<&str>,
    ) -> Result<ProcessOutcome> {
        let supplier = self.identify_supplier(text, supplier_hint);
        let supplier_label = supplier
            .clone()
            .unwrap_or_else(|| "Unknown Supplier".to_string());

        let algorithm = match supplier {
            Some(ref name) => self.learning.algorithm_for(name)?,
            None => None,
        };
        let has_profile = self.profiles.find(text).is_some();

        if algorithm.is_none() && !has_profile {
            info!(supplier = %supplier_label, "Unknown layout, supplier needs training");
            return Ok(ProcessOutcome::NeedsTraining {
                supplier: supplier_label,
                raw_text: text.to_string(),
            });
        }

        if let Some(ref algorithm) = algorithm {
            // A broken stored algorithm (hand-edited file, stale pattern)
            // must not take the whole cascade down with it.
            match self.learning.apply(algorithm, text, &self.config) {
                Ok(result) if has_usable_items(&result) => {
                    info!(supplier = %supplier_label, "Extracted with learned algorithm");
                    return self.extracted(result);
                }
                Ok(_) => warn!(
                    supplier = %supplier_label,
                    version = algorithm.version,
                    "Learned algorithm produced nothing usable, falling through"
                ),
                Err(e) => warn!(
                    supplier = %supplier_label,
                    version = algorithm.version,
                    error = %e,
                    "Learned algorithm failed, falling through"
                ),
            }
        }

        if let Some(profile) = self.profiles.find(text) {
            let result = profile.extract(text, &self.config);
            if has_usable_items(&result) {
                info!(profile = profile.key, "Extracted with built-in profile");
                return self.extracted(result);
            }
            debug!(profile = profile.key, "Profile matched but extracted nothing usable");
        }

        let scanned = profiles::generic_scan(text, &supplier_label, &self.config);
        if has_usable_items(&scanned) {
            info!(
                supplier = %supplier_label,
                items = scanned.line_items.len(),
                "Extracted with the generic line scan"
            );
            return self.extracted(scanned);
        }

        match text_ai::extract(
            &self.client,
            &mut self.prompts,
            &self.config,
            text,
            &supplier_label,
            None,
        )
        .await
        {
            Ok(result) if has_usable_items(&result) => {
                return self.extracted(result);
            }
            Ok(_) => debug!("Text AI extracted nothing usable"),
            Err(e) => warn!(error = %e, "Text AI extraction failed"),
        }

        Err(Error::InvalidData(format!(
            "No strategy extracted valid line items for {}",
            supplier_label
        )))
    }

    async fn try_vision(&mut self, doc: &InvoiceDocument) -> Option<ExtractionResult> {
        let page = match acquire::page_image(doc) {
            Ok(page) => page,
            Err(e) => {
                debug!(error = %e, "No page image available for vision");
                return None;
            }
        };
        match vision::extract(
            &self.client,
            &mut self.prompts,
            &self.config,
            &page,
            doc.supplier_hint.as_deref(),
        )
        .await
        {
            Ok(result) if has_usable_items(&result) => Some(result),
            Ok(_) => {
                debug!("Vision extracted nothing usable");
                None
            }
            Err(e) => {
                warn!(error = %e, "Vision extraction failed");
                None
            }
        }
    }

    /// Wrap a winning result, attaching catalog suggestions when a catalog
    /// is present
    fn extracted(&self, mut result: ExtractionResult) -> Result<ProcessOutcome> {
        if let Some(ref matcher) = self.matcher {
            for item in result.line_items.iter_mut() {
                item.suggestions =
                    Some(matcher.suggest(item.code.as_deref(), &item.description));
            }
        }
        Ok(ProcessOutcome::Extracted(Box::new(result)))
    }

    /// Name the supplier: hint, stored algorithms, profiles, then the
    /// first plausible header line
    fn identify_supplier(&self, text: &str, hint: Option<&str>) -> Option<String> {
        if let Some(hint) = hint {
            return Some(hint.to_string());
        }

        let lowered = text.to_ascii_lowercase();
        for algorithm in self.learning.list().unwrap_or_default() {
            if lowered.contains(&algorithm.supplier_name.to_ascii_lowercase()) {
                return Some(algorithm.supplier_name);
            }
        }

        if let Some(profile) = self.profiles.find(text) {
            return Some(profile.display_name.to_string());
        }

        first_header_line(text)
    }
}

/// Guess the supplier from the top of the invoice: the first short, mostly
/// alphabetic line that is not the word "invoice" itself
fn first_header_line(text: &str) -> Option<String> {
    text.lines()
        .take(5)
        .map(str::trim)
        .find(|line| {
            let len = line.chars().count();
            (3..=60).contains(&len)
                && line.chars().filter(|c| c.is_alphabetic()).count() * 2 >= len
                && !line.to_ascii_lowercase().starts_with("invoice")
        })
        .map(str::to_string)
}

fn has_usable_items(result: &ExtractionResult) -> bool {
    result.line_items.iter().any(|item| item.is_valid)
}
