//! Prompt library for model calls
//!
//! Prompts are loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/invox/prompts/overrides/)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! This allows prompt tuning per deployment without modifying the source,
//! while automatically getting new default prompts on upgrade.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default prompts (compiled into binary)
mod defaults {
    pub const EXTRACT_LINE_ITEMS: &str = include_str!("../../../prompts/extract_line_items.md");
    pub const EXTRACT_INVOICE_VISION: &str =
        include_str!("../../../prompts/extract_invoice_vision.md");
    pub const EXTRACT_INVOICE_VISION_SIMPLE: &str =
        include_str!("../../../prompts/extract_invoice_vision_simple.md");
    pub const GENERATE_ALGORITHM: &str = include_str!("../../../prompts/generate_algorithm.md");
}

/// Known prompt IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Generic AI text extraction (OCR/PDF text → line-item array)
    ExtractLineItems,
    /// Detailed vision extraction (first attempt)
    ExtractInvoiceVision,
    /// Minimal vision extraction (safety/truncation retry)
    ExtractInvoiceVisionSimple,
    /// Learned-algorithm generation from training annotations
    GenerateAlgorithm,
}

impl PromptId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractLineItems => "extract_line_items",
            Self::ExtractInvoiceVision => "extract_invoice_vision",
            Self::ExtractInvoiceVisionSimple => "extract_invoice_vision_simple",
            Self::GenerateAlgorithm => "generate_algorithm",
        }
    }

    pub fn all() -> &'static [PromptId] {
        &[
            Self::ExtractLineItems,
            Self::ExtractInvoiceVision,
            Self::ExtractInvoiceVisionSimple,
            Self::GenerateAlgorithm,
        ]
    }

    fn default_content(&self) -> &'static str {
        match self {
            Self::ExtractLineItems => defaults::EXTRACT_LINE_ITEMS,
            Self::ExtractInvoiceVision => defaults::EXTRACT_INVOICE_VISION,
            Self::ExtractInvoiceVisionSimple => defaults::EXTRACT_INVOICE_VISION_SIMPLE,
            Self::GenerateAlgorithm => defaults::GENERATE_ALGORITHM,
        }
    }
}

/// Prompt frontmatter metadata
#[derive(Debug, Clone, Deserialize)]
pub struct PromptMetadata {
    pub id: String,
    pub version: u32,
    pub task_type: String,
}

/// A loaded prompt with metadata and content
#[derive(Debug, Clone)]
pub struct Prompt {
    pub metadata: PromptMetadata,
    /// The prompt content (system + user sections)
    pub content: String,
    pub is_override: bool,
}

impl Prompt {
    pub fn system_section(&self) -> Option<&str> {
        extract_section(&self.content, "# System")
    }

    pub fn user_section(&self) -> Option<&str> {
        extract_section(&self.content, "# User")
    }

    /// Render the user section with `{{var}}` replacement and
    /// `{{#if var}}...{{/if}}` conditionals.
    pub fn render_user(&self, vars: &HashMap<&str, &str>) -> String {
        let template = self.user_section().unwrap_or(&self.content);
        let mut result = template.to_string();
        for (key, value) in vars {
            let pattern = format!("{{{{{}}}}}", key);
            result = result.replace(&pattern, value);
        }
        remove_unmatched_conditionals(&result, vars)
    }

    /// Render system and user sections joined, for backends that take a
    /// single prompt string.
    pub fn render_full(&self, vars: &HashMap<&str, &str>) -> String {
        match self.system_section() {
            Some(system) => format!("{}\n\n{}", system, self.render_user(vars)),
            None => self.render_user(vars),
        }
    }
}

/// Prompt library for loading and caching prompts
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
    cache: HashMap<PromptId, Prompt>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self {
            override_dir: default_prompts_dir(),
            cache: HashMap::new(),
        }
    }

    /// Embedded defaults only; used in tests.
    pub fn embedded_only() -> Self {
        Self {
            override_dir: None,
            cache: HashMap::new(),
        }
    }

    /// Get a prompt by ID, loading from override or default
    pub fn get(&mut self, id: PromptId) -> Result<&Prompt> {
        if !self.cache.contains_key(&id) {
            let prompt = self.load(id)?;
            self.cache.insert(id, prompt);
        }
        Ok(self.cache.get(&id).unwrap())
    }

    fn load(&self, id: PromptId) -> Result<Prompt> {
        if let Some(ref override_dir) = self.override_dir {
            let override_path = override_dir.join(format!("{}.md", id.as_str()));
            if override_path.exists() {
                let content = fs::read_to_string(&override_path).map_err(|e| {
                    Error::InvalidData(format!("Failed to read prompt override: {}", e))
                })?;
                let (metadata, body) = parse_prompt(&content)?;
                return Ok(Prompt {
                    metadata,
                    content: body,
                    is_override: true,
                });
            }
        }

        let (metadata, body) = parse_prompt(id.default_content())?;
        Ok(Prompt {
            metadata,
            content: body,
            is_override: false,
        })
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Default prompts override directory
pub fn default_prompts_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("invox").join("prompts").join("overrides"))
}

/// Parse a prompt file into metadata and body
fn parse_prompt(content: &str) -> Result<(PromptMetadata, String)> {
    let content = content.trim();

    if !content.starts_with("---") {
        return Err(Error::InvalidData(
            "Prompt must start with YAML frontmatter (---)".into(),
        ));
    }

    let rest = &content[3..];
    let end = rest.find("---").ok_or_else(|| {
        Error::InvalidData("Prompt frontmatter not closed (missing second ---)".into())
    })?;

    let frontmatter = rest[..end].trim();
    let body = rest[end + 3..].trim();

    let metadata: PromptMetadata = serde_yaml::from_str(frontmatter)
        .map_err(|e| Error::InvalidData(format!("Invalid prompt frontmatter: {}", e)))?;

    Ok((metadata, body.to_string()))
}

/// Extract a `# Header` section from the prompt content
fn extract_section<'a>(content: &'a str, header: &str) -> Option<&'a str> {
    let start = content.find(header)?;
    let after_header = &content[start + header.len()..];
    let end = after_header.find("\n# ").unwrap_or(after_header.len());
    Some(after_header[..end].trim())
}

/// Remove unmatched `{{#if var}}...{{/if}}` blocks from the template
fn remove_unmatched_conditionals(content: &str, vars: &HashMap<&str, &str>) -> String {
    let mut result = content.to_string();

    loop {
        let Some(if_start) = result.find("{{#if ") else {
            break;
        };
        let var_start = if_start + 6;
        let Some(var_end) = result[var_start..].find("}}") else {
            break;
        };
        let var_name = result[var_start..var_start + var_end].to_string();
        let block_start = var_start + var_end + 2;

        let Some(endif_pos) = result[block_start..].find("{{/if}}") else {
            break;
        };
        let block_content = result[block_start..block_start + endif_pos].to_string();
        let full_end = block_start + endif_pos + 7;

        let should_include = vars.get(var_name.as_str()).is_some_and(|v| !v.is_empty());

        if should_include {
            result = format!(
                "{}{}{}",
                &result[..if_start],
                block_content,
                &result[full_end..]
            );
        } else {
            result = format!("{}{}", &result[..if_start], &result[full_end..]);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_embedded_prompts_parse() {
        let mut lib = PromptLibrary::embedded_only();
        for &id in PromptId::all() {
            let prompt = lib.get(id).unwrap();
            assert_eq!(prompt.metadata.id, id.as_str());
            assert!(prompt.user_section().is_some(), "{} has a user section", id.as_str());
        }
    }

    #[test]
    fn test_render_replaces_vars() {
        let mut lib = PromptLibrary::embedded_only();
        let prompt = lib.get(PromptId::ExtractLineItems).unwrap();
        let mut vars = HashMap::new();
        vars.insert("invoice_text", "WIDGET 2 x 1 10.00");
        vars.insert("total_amount", "23.00");
        let rendered = prompt.render_user(&vars);
        assert!(rendered.contains("WIDGET 2 x 1 10.00"));
        assert!(rendered.contains("23.00"));
        assert!(!rendered.contains("{{invoice_text}}"));
    }

    #[test]
    fn test_conditionals_removed_when_var_missing() {
        let mut lib = PromptLibrary::embedded_only();
        let prompt = lib.get(PromptId::ExtractLineItems).unwrap();
        let mut vars = HashMap::new();
        vars.insert("invoice_text", "x");
        let rendered = prompt.render_user(&vars);
        assert!(!rendered.contains("{{#if"));
        assert!(!rendered.contains("Known invoice number"));
    }

    #[test]
    fn test_conditional_kept_when_var_present() {
        let mut lib = PromptLibrary::embedded_only();
        let prompt = lib.get(PromptId::ExtractLineItems).unwrap();
        let mut vars = HashMap::new();
        vars.insert("invoice_text", "x");
        vars.insert("invoice_number", "INV-1001");
        let rendered = prompt.render_user(&vars);
        assert!(rendered.contains("Known invoice number: INV-1001"));
    }

    #[test]
    fn test_render_full_includes_system() {
        let mut lib = PromptLibrary::embedded_only();
        let prompt = lib.get(PromptId::ExtractInvoiceVision).unwrap();
        let rendered = prompt.render_full(&HashMap::new());
        assert!(rendered.contains("JSON object"));
    }
}
