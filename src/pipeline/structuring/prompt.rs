use crate::models::Provenance;

/// Prompt for one generation attempt, built from a raw document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub prompt: String,
    /// Characters of document text included in the prompt.
    pub included_chars: usize,
    pub truncated: bool,
}

impl ExtractionRequest {
    pub fn build(raw_text: &str, provenance: Provenance, max_chars: usize) -> Self {
        let (excerpt, truncated) = truncate_chars(raw_text, max_chars);
        let included_chars = excerpt.chars().count();
        Self {
            prompt: build_extraction_prompt(excerpt, provenance),
            included_chars,
            truncated,
        }
    }
}

/// Leading `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

const RECORD_SCHEMA: &str = r#"{
    "text": "Exact quote from the source",
    "type": "FACT" | "PRINCIPLE" | "OPINION",
    "reasoning": "Brief explanation of the classification"
}"#;

/// Build the extraction prompt; wording follows the document's origin.
pub fn build_extraction_prompt(excerpt: &str, provenance: Provenance) -> String {
    let (role, source_kind, type_hints, label) = match provenance {
        Provenance::Retail => (
            "You are a strictly logical data processor for a financial knowledge base.",
            "transcript",
            "FACT for objective data, PRINCIPLE for a general rule, OPINION for a subjective view",
            "TRANSCRIPT",
        ),
        Provenance::Institutional => (
            "You are a Financial Analyst Data Extractor.",
            "equity research report",
            "FACT for earnings, revenue or margins, PRINCIPLE for valuation methods or \
             industry trends, OPINION for ratings or price targets",
            "REPORT TEXT",
        ),
    };

    format!(
        "{role}\n\n\
         Task: Extract the key logical units from the provided {source_kind}.\n\n\
         Output: Return ONLY a raw JSON list. No markdown, no introduction.\n\n\
         Schema for each item:\n{RECORD_SCHEMA}\n\n\
         Classify as {type_hints}.\n\n\
         {label}:\n{excerpt}\n"
    )
}
