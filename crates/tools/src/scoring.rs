//! Positioning readiness scoring.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pmm_domain::error::{Error, Result};
use pmm_engine::tools::Tool;

#[derive(Debug, Deserialize)]
struct ReadinessArgs {
    has_target_customer: bool,
    has_competitive_alternative: bool,
    has_key_differentiator: bool,
    has_customer_proof: bool,
    has_clear_category: bool,
}

/// Structured readiness assessment output.
#[derive(Debug, Serialize)]
struct ReadinessScore {
    /// Readiness score on a 0-10 scale, two points per check passed.
    score: u8,
    strengths: Vec<String>,
    gaps: Vec<String>,
    next_action: String,
}

fn assess(args: &ReadinessArgs) -> ReadinessScore {
    let checks = [
        ("Target Customer Definition", args.has_target_customer),
        (
            "Competitive Alternative Identified",
            args.has_competitive_alternative,
        ),
        ("Key Differentiator Articulated", args.has_key_differentiator),
        ("Customer Proof Available", args.has_customer_proof),
        ("Market Category Defined", args.has_clear_category),
    ];

    let strengths: Vec<String> = checks
        .iter()
        .filter(|(_, ok)| *ok)
        .map(|(label, _)| (*label).to_owned())
        .collect();
    let gaps: Vec<String> = checks
        .iter()
        .filter(|(_, ok)| !*ok)
        .map(|(label, _)| (*label).to_owned())
        .collect();
    let score = (strengths.len() * 2) as u8;

    // Gaps are resolved in dependency order: positioning work is
    // pointless before the target customer is known, and so on down.
    let next_action = if !args.has_target_customer {
        "Define your target customer segment first"
    } else if !args.has_competitive_alternative {
        "Identify what customers use before finding you"
    } else if !args.has_key_differentiator {
        "Articulate what you have that alternatives don't"
    } else if !args.has_customer_proof {
        "Collect customer testimonials and use cases"
    } else if !args.has_clear_category {
        "Define your market category"
    } else {
        "You're ready to create positioning!"
    };

    ReadinessScore {
        score,
        strengths,
        gaps,
        next_action: next_action.to_owned(),
    }
}

/// Calculates how ready a product is for positioning work.
pub struct PositioningReadiness;

#[async_trait::async_trait]
impl Tool for PositioningReadiness {
    fn name(&self) -> &str {
        "calculate_positioning_readiness"
    }

    fn description(&self) -> &str {
        "Calculate how ready a product is for positioning work. Use this \
         when a user wants to assess if they're ready to create \
         positioning, or what gaps they need to fill first."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "has_target_customer": {
                    "type": "boolean",
                    "description": "Do they know their ideal customer?"
                },
                "has_competitive_alternative": {
                    "type": "boolean",
                    "description": "Do they know what customers use instead?"
                },
                "has_key_differentiator": {
                    "type": "boolean",
                    "description": "Do they have a unique capability?"
                },
                "has_customer_proof": {
                    "type": "boolean",
                    "description": "Do they have customer evidence/testimonials?"
                },
                "has_clear_category": {
                    "type": "boolean",
                    "description": "Do they know their market category?"
                }
            },
            "required": [
                "has_target_customer",
                "has_competitive_alternative",
                "has_key_differentiator",
                "has_customer_proof",
                "has_clear_category"
            ]
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<Value> {
        let args: ReadinessArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::Tool(format!("invalid readiness arguments: {e}")))?;
        let score = assess(&args);
        Ok(serde_json::to_value(score)?)
    }
}
