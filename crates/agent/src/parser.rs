use insight_core::domain::customer::AnalysisContent;
use insight_core::errors::AnalysisError;
use serde_json::{Map, Value};

const FREQUENT_ORDERS: &str = "frequentOrders";
const RECOMMENDATIONS: &str = "personalizedRecommendations";
const RECOMMENDATIONS_REASON: &str = "personalizedRecommendationsReason";
const CUSTOMER_SEGMENTS: &str = "customerSegments";

/// Decodes engine output into analysis fields.
///
/// Only a structural decode failure is an error. Missing or mistyped fields
/// degrade to empty values; list fields are passed through untruncated.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn parse(raw: &str) -> Result<AnalysisContent, AnalysisError> {
        let stripped = strip_code_fences(raw);

        let value: Value = serde_json::from_str(stripped).map_err(|error| {
            AnalysisError::MalformedResponse {
                reason: format!("response is not valid JSON: {error}"),
                raw: raw.to_string(),
            }
        })?;

        let Value::Object(object) = value else {
            return Err(AnalysisError::MalformedResponse {
                reason: "response JSON is not an object".to_string(),
                raw: raw.to_string(),
            });
        };

        Ok(AnalysisContent {
            frequent_orders: text_list(&object, FREQUENT_ORDERS),
            personalized_recommendations: text_list(&object, RECOMMENDATIONS),
            personalized_recommendations_reason: text_field(&object, RECOMMENDATIONS_REASON),
            customer_segments: text_field(&object, CUSTOMER_SEGMENTS),
        })
    }
}

/// Removes a leading ```` ``` ```` fence (with optional language tag) and a
/// trailing fence, plus surrounding whitespace.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.find('\n') {
            Some(newline) if rest[..newline].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &rest[newline + 1..]
            }
            _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
    }

    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }

    text.trim()
}

fn text_list(object: &Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::Array(items)) => items.iter().map(render_text).collect(),
        _ => Vec::new(),
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        Some(Value::Null) | None => String::new(),
        Some(value) => render_text(value),
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
