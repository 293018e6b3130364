//! Product intake analysis.
//!
//! Turns a free-form product description into a structured intake
//! profile: audience, category, differentiators, and what is still
//! missing before positioning work can start. Keyword-driven and
//! deterministic; the engine layers judgement on top of this.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pmm_domain::error::{Error, Result};
use pmm_engine::tools::Tool;

#[derive(Debug, Deserialize)]
struct AnalyzeArgs {
    product_description: String,
}

#[derive(Debug, Serialize)]
struct ProductProfile {
    summary: String,
    detected_audiences: Vec<String>,
    detected_categories: Vec<String>,
    differentiator_signals: Vec<String>,
    missing_info: Vec<String>,
    word_count: usize,
}

const AUDIENCE_KEYWORDS: &[(&str, &str)] = &[
    ("founder", "founders"),
    ("startup", "startups"),
    ("developer", "developers"),
    ("engineer", "engineering teams"),
    ("marketer", "marketers"),
    ("sales team", "sales teams"),
    ("enterprise", "enterprises"),
    ("small business", "small businesses"),
    ("smb", "small businesses"),
    ("agencies", "agencies"),
    ("freelancer", "freelancers"),
];

const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("crm", "CRM"),
    ("analytics", "analytics"),
    ("automation", "workflow automation"),
    ("api", "developer platform"),
    ("platform", "platform"),
    ("marketplace", "marketplace"),
    ("saas", "SaaS"),
    ("security", "security"),
    ("billing", "billing"),
    ("payment", "payments"),
    ("database", "data infrastructure"),
    ("monitoring", "observability"),
];

// Phrases that usually introduce a differentiation claim.
const DIFFERENTIATOR_CUES: &[&str] = &[
    "only", "unlike", "first", "fastest", "cheapest", "without",
    "instead of", "no code", "in minutes", "automatically",
];

fn analyze(description: &str) -> ProductProfile {
    let lower = description.to_lowercase();
    let word_count = description.split_whitespace().count();

    let detected_audiences = scan(&lower, AUDIENCE_KEYWORDS);
    let detected_categories = scan(&lower, CATEGORY_KEYWORDS);

    let differentiator_signals: Vec<String> = DIFFERENTIATOR_CUES
        .iter()
        .filter(|cue| lower.contains(*cue))
        .map(|cue| (*cue).to_owned())
        .collect();

    let mut missing_info = Vec::new();
    if detected_audiences.is_empty() {
        missing_info.push("target audience".to_owned());
    }
    if detected_categories.is_empty() {
        missing_info.push("market category".to_owned());
    }
    if differentiator_signals.is_empty() {
        missing_info.push("differentiation claim".to_owned());
    }
    if word_count < 15 {
        missing_info.push("enough detail to analyze (description is very short)".to_owned());
    }

    let summary = match (detected_categories.first(), detected_audiences.first()) {
        (Some(cat), Some(aud)) => format!("A {cat} product aimed at {aud}."),
        (Some(cat), None) => format!("A {cat} product with no clearly stated audience."),
        (None, Some(aud)) => format!("A product aimed at {aud}; category unclear."),
        (None, None) => "Neither category nor audience is clear from the description.".to_owned(),
    };

    ProductProfile {
        summary,
        detected_audiences,
        detected_categories,
        differentiator_signals,
        missing_info,
        word_count,
    }
}

fn scan(haystack: &str, keywords: &[(&str, &str)]) -> Vec<String> {
    let mut found = Vec::new();
    for (needle, label) in keywords {
        if haystack.contains(needle) && !found.iter().any(|f: &String| f == label) {
            found.push((*label).to_owned());
        }
    }
    found
}

/// Analyzes a product description into a structured intake profile.
pub struct AnalyzeProduct;

#[async_trait::async_trait]
impl Tool for AnalyzeProduct {
    fn name(&self) -> &str {
        "analyze_product"
    }

    fn description(&self) -> &str {
        "Analyze a product description and extract a structured intake \
         profile: audience, market category, differentiation signals, \
         and what is still missing. Use this before assessing \
         positioning readiness."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "product_description": {
                    "type": "string",
                    "description": "Free-form description of the product to analyze"
                }
            },
            "required": ["product_description"]
        })
    }

    // Engines sometimes request this tool with empty arguments right
    // after the user described their product; recover from the
    // conversation instead of failing the turn.
    fn fallback_text_field(&self) -> Option<&str> {
        Some("product_description")
    }

    async fn invoke(&self, arguments: Value) -> Result<Value> {
        let args: AnalyzeArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::Tool(format!("invalid analyze arguments: {e}")))?;
        if args.product_description.trim().is_empty() {
            return Err(Error::Tool("product_description must not be empty".into()));
        }

        tracing::debug!(
            chars = args.product_description.len(),
            "analyzing product description"
        );
        let profile = analyze(&args.product_description);
        Ok(serde_json::to_value(profile)?)
    }
}
