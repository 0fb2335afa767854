use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use super::errors::{FailureReason, FileFailure, StructuringError};
use super::models::{IngestSettings, ResumeProfile};
use super::structuring::{RetryPolicy, StructuredExtractor};

static CONTROL_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\t\x0b\x0c]+").unwrap());
static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Lines seen this many times are page headers/footers, not content.
const REPEATED_LINE_MIN_COUNT: usize = 5;
const REPEATED_LINE_MAX_LEN: usize = 80;

#[derive(Debug, Clone)]
pub struct InputBudget {
    pub chars_per_token: usize,
    pub max_input_tokens: usize,
    pub max_input_chars: usize,
    pub aggressive_ratio: f64,
}

impl InputBudget {
    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self {
            chars_per_token: settings.chars_per_token.max(1),
            max_input_tokens: settings.max_input_tokens.max(1),
            max_input_chars: settings.max_input_chars.max(1),
            aggressive_ratio: settings.aggressive_compaction_ratio,
        }
    }

    pub fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    fn char_ceiling(&self) -> usize {
        self.max_input_chars
            .min(self.max_input_tokens.saturating_mul(self.chars_per_token))
    }

    /// Cleans boilerplate and caps the text so its estimate fits the token budget.
    pub fn compact(&self, text: &str) -> String {
        let cleaned = strip_boilerplate(text);
        truncate_chars(&cleaned, self.char_ceiling()).to_string()
    }

    /// Second-chance compaction after the service still rejected the input size.
    /// Always shrinks non-empty input.
    pub fn compact_aggressive(&self, text: &str) -> String {
        let cleaned = self.compact(text);
        let current = cleaned.chars().count();
        let target = ((current as f64) * self.aggressive_ratio).floor() as usize;
        let target = target.min(current.saturating_sub(1));
        truncate_chars(&cleaned, target).trim_end().to_string()
    }
}

/// Runs structuring under the budget: compact first, and on a size rejection
/// retry exactly once with aggressive compaction before giving up.
pub async fn structure_with_compaction(
    extractor: &dyn StructuredExtractor,
    policy: &RetryPolicy,
    budget: &InputBudget,
    text: &str,
) -> Result<ResumeProfile, FileFailure> {
    let compacted = budget.compact(text);
    let original_chars = text.chars().count();
    let compacted_chars = compacted.chars().count();
    if compacted_chars < original_chars {
        info!(
            original_chars,
            compacted_chars,
            est_tokens = budget.estimate_tokens(&compacted),
            "compacted structuring input"
        );
    }

    match policy.run(extractor, &compacted).await {
        Ok(profile) => Ok(profile),
        Err(StructuringError::ContentTooLarge(first)) => {
            let aggressive = budget.compact_aggressive(&compacted);
            info!(
                previous_chars = compacted_chars,
                retry_chars = aggressive.chars().count(),
                detail = %first,
                "structuring input still too large, retrying with aggressive compaction"
            );

            match policy.run(extractor, &aggressive).await {
                Ok(profile) => Ok(profile),
                Err(StructuringError::ContentTooLarge(detail)) => Err(FileFailure::new(
                    FailureReason::ContentTooLarge,
                    format!("rejected after aggressive compaction: {detail}"),
                )),
                Err(other) => Err(other.into()),
            }
        }
        Err(other) => Err(other.into()),
    }
}

fn strip_boilerplate(text: &str) -> String {
    let normalized = text.replace('\r', "");
    let normalized = CONTROL_SPACE_RE.replace_all(&normalized, " ");
    let lines: Vec<&str> = normalized.split('\n').map(str::trim).collect();

    let mut frequency: HashMap<&str, usize> = HashMap::new();
    for line in &lines {
        if line.chars().count() > 2 {
            *frequency.entry(*line).or_default() += 1;
        }
    }

    let kept: Vec<&str> = lines
        .into_iter()
        .filter(|line| {
            let count = frequency.get(line).copied().unwrap_or(0);
            !(count >= REPEATED_LINE_MIN_COUNT && line.chars().count() <= REPEATED_LINE_MAX_LEN)
        })
        .collect();

    let joined = kept.join("\n");
    let joined = MULTI_SPACE_RE.replace_all(&joined, " ");
    BLANK_LINES_RE.replace_all(&joined, "\n\n").trim().to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
