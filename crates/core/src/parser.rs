//! Parses the model's free-form structured output into a typed response.
//!
//! A malformed decode is an error. A merely incomplete action payload is a
//! normal conversational state: it produces a clarifying answer and another
//! turn, never a retry of the model call.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::ParseError;
use crate::intent::{ActionData, Intent};

/// What the action half of a parsed response amounts to.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome {
    /// No dispatch: informational intent, or an informational completion of
    /// a dual-state intent.
    None,
    /// Valid structure, required fields still missing. `final_answer` is the
    /// clarifying question for the next turn.
    Incomplete { missing: Vec<&'static str> },
    /// Validated payload, ready for the webhook mapper.
    Ready(ActionData),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedModelResponse {
    pub intent: Intent,
    pub confidence: f32,
    pub final_answer: String,
    pub action: ActionOutcome,
}

impl ParsedModelResponse {
    pub fn is_complete(&self) -> bool {
        !matches!(self.action, ActionOutcome::Incomplete { .. })
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    final_answer: Option<String>,
    #[serde(default)]
    webhook_data: Option<Value>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> Result<ParsedModelResponse, ParseError> {
        let stripped = strip_fences(raw);
        let decoded: RawResponse = serde_json::from_str(stripped)
            .map_err(|source| ParseError::Malformed { detail: source.to_string() })?;

        let intent_label = decoded.intent.ok_or(ParseError::MissingIntent)?;
        let intent = Intent::parse(&intent_label)?;
        let confidence = decoded.confidence.unwrap_or(0.0).clamp(0.0, 1.0);
        let mut final_answer = decoded.final_answer.unwrap_or_default().trim().to_string();

        let action = if intent.schema().requires_action {
            match decoded.webhook_data {
                Some(value) => match ActionData::from_value(intent, value)? {
                    Some(data) => classify(data),
                    None => ActionOutcome::None,
                },
                // The model answered an actionable intent without any
                // payload at all; ask for everything the schema needs.
                None => ActionOutcome::Incomplete { missing: intent.schema().required.to_vec() },
            }
        } else {
            ActionOutcome::None
        };

        if final_answer.is_empty() {
            final_answer = fallback_answer(&action);
        }

        Ok(ParsedModelResponse { intent, confidence, final_answer, action })
    }
}

fn classify(data: ActionData) -> ActionOutcome {
    let missing = data.missing_fields();
    if !missing.is_empty() {
        return ActionOutcome::Incomplete { missing };
    }
    if data.model_marked_incomplete() {
        return ActionOutcome::Incomplete { missing: Vec::new() };
    }
    if data.is_dispatchable() {
        return ActionOutcome::Ready(data);
    }
    ActionOutcome::None
}

/// The clarifying answer must never be empty, even when the model forgot to
/// provide one.
fn fallback_answer(action: &ActionOutcome) -> String {
    match action {
        ActionOutcome::Incomplete { missing } if !missing.is_empty() => {
            format!("To continue I still need: {}.", missing.join(", "))
        }
        ActionOutcome::Incomplete { .. } => {
            "Could you confirm the remaining details so I can proceed?".to_string()
        }
        _ => "Is there anything else I can help you with?".to_string(),
    }
}

/// Drops the markdown code fences models like to wrap JSON in.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ActionOutcome, ResponseParser};
    use crate::errors::ParseError;
    use crate::intent::{ActionData, Intent};

    fn parser() -> ResponseParser {
        ResponseParser::new()
    }

    #[test]
    fn parses_plain_information_query() {
        let raw = json!({
            "intent": "INFORMATION_QUERY",
            "confidence": 0.92,
            "final_answer": "We are open 9 to 6, Monday through Saturday."
        })
        .to_string();

        let parsed = parser().parse(&raw).expect("parse");
        assert_eq!(parsed.intent, Intent::InformationQuery);
        assert_eq!(parsed.action, ActionOutcome::None);
        assert!(parsed.is_complete());
        assert!((parsed.confidence - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn strips_markdown_fences_before_decoding() {
        let raw = "```json\n{\"intent\": \"INFORMATION_QUERY\", \"confidence\": 1.4, \"final_answer\": \"hi\"}\n```";
        let parsed = parser().parse(raw).expect("parse");
        assert_eq!(parsed.intent, Intent::InformationQuery);
        assert_eq!(parsed.confidence, 1.0, "confidence is clamped to [0, 1]");
    }

    #[test]
    fn malformed_output_is_an_error() {
        let result = parser().parse("I think you should order two of them!");
        assert!(matches!(result, Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn unknown_intent_is_an_error() {
        let raw = json!({"intent": "BOOK_FLIGHT", "final_answer": "done"}).to_string();
        assert!(matches!(parser().parse(&raw), Err(ParseError::UnknownIntent(_))));
    }

    #[test]
    fn missing_intent_is_an_error() {
        let raw = json!({"final_answer": "done"}).to_string();
        assert!(matches!(parser().parse(&raw), Err(ParseError::MissingIntent)));
    }

    #[test]
    fn every_actionable_intent_with_empty_payload_is_incomplete_with_answer() {
        for intent in Intent::ALL {
            if !intent.schema().requires_action {
                continue;
            }
            let raw = json!({
                "intent": intent.as_str(),
                "confidence": 0.8,
                "webhook_data": {}
            })
            .to_string();

            let parsed = parser().parse(&raw).expect("parse");
            match &parsed.action {
                ActionOutcome::Incomplete { missing } => {
                    assert!(!missing.is_empty(), "{intent:?} should name missing fields");
                }
                other => panic!("{intent:?} should be incomplete, got {other:?}"),
            }
            assert!(!parsed.final_answer.is_empty(), "{intent:?} must carry a clarifying answer");
        }
    }

    #[test]
    fn absent_webhook_data_on_actionable_intent_asks_for_schema_fields() {
        let raw = json!({"intent": "PLACE_ORDER", "final_answer": ""}).to_string();
        let parsed = parser().parse(&raw).expect("parse");

        let ActionOutcome::Incomplete { missing } = &parsed.action else {
            panic!("expected incomplete action");
        };
        assert_eq!(*missing, Intent::PlaceOrder.schema().required.to_vec());
        assert!(parsed.final_answer.contains("items"));
    }

    #[test]
    fn informational_stock_answer_produces_no_action() {
        let raw = json!({
            "intent": "CHECK_QUANTITY",
            "confidence": 0.85,
            "final_answer": "We currently have 7 units of iPhone 15 Pro Max in stock.",
            "webhook_data": {"item_name": "iPhone 15 Pro Max"}
        })
        .to_string();

        let parsed = parser().parse(&raw).expect("parse");
        assert_eq!(parsed.action, ActionOutcome::None);
        assert!(parsed.final_answer.contains("in stock"));
    }

    #[test]
    fn actionable_stock_check_is_ready_for_mapping() {
        let raw = json!({
            "intent": "CHECK_QUANTITY",
            "confidence": 0.9,
            "final_answer": "I will ask the team to confirm availability.",
            "webhook_data": {
                "item_name": "iPhone 15 Pro Max",
                "record_id": "sku-901",
                "customer": {"name": "Dana Silva", "phone": "+5511999990000"},
                "complete": true
            }
        })
        .to_string();

        let parsed = parser().parse(&raw).expect("parse");
        let ActionOutcome::Ready(ActionData::CheckQuantity(action)) = parsed.action else {
            panic!("expected ready check-quantity action");
        };
        assert_eq!(action.record_id.as_deref(), Some("sku-901"));
    }

    #[test]
    fn model_incomplete_flag_yields_clarifying_state_not_error() {
        let raw = json!({
            "intent": "PLACE_ORDER",
            "confidence": 0.7,
            "final_answer": "What address should we deliver to?",
            "webhook_data": {
                "items": [{"item_name": "iPhone 15 Pro Max", "quantity": 1}],
                "delivery_address": "Av. Paulista 1000",
                "customer": {"name": "Dana Silva", "phone": "+5511999990000"},
                "complete": false
            }
        })
        .to_string();

        let parsed = parser().parse(&raw).expect("parse");
        assert!(matches!(parsed.action, ActionOutcome::Incomplete { .. }));
        assert!(!parsed.is_complete());
    }
}
