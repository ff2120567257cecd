//! Intent registry: one closed label per supported conversation goal, a
//! static schema table describing each intent's action payload, and the typed
//! payload union the parser decodes into.
//!
//! Adding an intent means adding an enum variant, a payload struct, and a
//! table row; nothing else in the pipeline changes.

use serde::{Deserialize, Serialize};

use crate::domain::customer::Customer;
use crate::errors::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    InformationQuery,
    CheckQuantity,
    PlaceOrder,
    UpdateOrder,
}

impl Intent {
    pub const ALL: [Intent; 4] =
        [Self::InformationQuery, Self::CheckQuantity, Self::PlaceOrder, Self::UpdateOrder];

    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "INFORMATION_QUERY" => Ok(Self::InformationQuery),
            "CHECK_QUANTITY" => Ok(Self::CheckQuantity),
            "PLACE_ORDER" => Ok(Self::PlaceOrder),
            "UPDATE_ORDER" => Ok(Self::UpdateOrder),
            other => Err(ParseError::UnknownIntent(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InformationQuery => "INFORMATION_QUERY",
            Self::CheckQuantity => "CHECK_QUANTITY",
            Self::PlaceOrder => "PLACE_ORDER",
            Self::UpdateOrder => "UPDATE_ORDER",
        }
    }

    pub fn schema(&self) -> &'static IntentSchema {
        match self {
            Self::InformationQuery => &INFORMATION_QUERY,
            Self::CheckQuantity => &CHECK_QUANTITY,
            Self::PlaceOrder => &PLACE_ORDER,
            Self::UpdateOrder => &UPDATE_ORDER,
        }
    }
}

/// One registry row. `required` lists the fields a dispatchable payload must
/// carry; `internal` lists model-only bookkeeping fields that must never be
/// forwarded externally.
#[derive(Debug)]
pub struct IntentSchema {
    pub intent: Intent,
    pub requires_action: bool,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub internal: &'static [&'static str],
    /// CHECK_QUANTITY completes in two states: without a customer it is a
    /// plain informational answer, with one it becomes an actionable
    /// verification request.
    pub customer_gates_action: bool,
}

static INFORMATION_QUERY: IntentSchema = IntentSchema {
    intent: Intent::InformationQuery,
    requires_action: false,
    required: &[],
    optional: &[],
    internal: &["complete"],
    customer_gates_action: false,
};

static CHECK_QUANTITY: IntentSchema = IntentSchema {
    intent: Intent::CheckQuantity,
    requires_action: true,
    required: &["item_name", "customer.name", "customer.phone"],
    optional: &["record_id", "quantity", "notes"],
    internal: &["complete", "conversation_id"],
    customer_gates_action: true,
};

static PLACE_ORDER: IntentSchema = IntentSchema {
    intent: Intent::PlaceOrder,
    requires_action: true,
    required: &["items", "delivery_address", "customer.name", "customer.phone"],
    optional: &["payment_method", "notes"],
    internal: &["complete", "conversation_id"],
    customer_gates_action: false,
};

static UPDATE_ORDER: IntentSchema = IntentSchema {
    intent: Intent::UpdateOrder,
    requires_action: true,
    required: &["order_code", "changes", "customer.name", "customer.phone"],
    optional: &["notes"],
    // order_code rides the dispatch path, not the payload body.
    internal: &["complete", "conversation_id", "order_code"],
    customer_gates_action: false,
};

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |text| text.trim().is_empty())
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct CheckQuantityAction {
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub complete: Option<bool>,
}

impl CheckQuantityAction {
    /// Either an item name or a record id identifies the item.
    pub fn has_item_reference(&self) -> bool {
        !blank(&self.item_name) || !blank(&self.record_id)
    }
}

fn default_order_quantity() -> i64 {
    1
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct OrderItem {
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default = "default_order_quantity")]
    pub quantity: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PlaceOrderAction {
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub complete: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct OrderChanges {
    #[serde(default)]
    pub items: Option<Vec<OrderItem>>,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl OrderChanges {
    pub fn is_empty(&self) -> bool {
        self.items.as_ref().map_or(true, Vec::is_empty)
            && blank(&self.delivery_address)
            && blank(&self.notes)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UpdateOrderAction {
    #[serde(default)]
    pub order_code: Option<String>,
    #[serde(default)]
    pub changes: Option<OrderChanges>,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub complete: Option<bool>,
}

/// Typed action payload, one variant per actionable intent.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionData {
    CheckQuantity(CheckQuantityAction),
    PlaceOrder(PlaceOrderAction),
    UpdateOrder(UpdateOrderAction),
}

impl ActionData {
    /// Decodes raw `webhook_data` into the intent's typed variant.
    /// INFORMATION_QUERY carries no payload and yields `None`.
    pub fn from_value(
        intent: Intent,
        value: serde_json::Value,
    ) -> Result<Option<Self>, ParseError> {
        let invalid = |source: serde_json::Error| ParseError::InvalidPayload {
            intent,
            detail: source.to_string(),
        };

        match intent {
            Intent::InformationQuery => Ok(None),
            Intent::CheckQuantity => {
                Ok(Some(Self::CheckQuantity(serde_json::from_value(value).map_err(invalid)?)))
            }
            Intent::PlaceOrder => {
                Ok(Some(Self::PlaceOrder(serde_json::from_value(value).map_err(invalid)?)))
            }
            Intent::UpdateOrder => {
                Ok(Some(Self::UpdateOrder(serde_json::from_value(value).map_err(invalid)?)))
            }
        }
    }

    pub fn intent(&self) -> Intent {
        match self {
            Self::CheckQuantity(_) => Intent::CheckQuantity,
            Self::PlaceOrder(_) => Intent::PlaceOrder,
            Self::UpdateOrder(_) => Intent::UpdateOrder,
        }
    }

    /// Required fields still absent before this payload can be dispatched.
    ///
    /// CHECK_QUANTITY without any customer object reports nothing missing:
    /// that is its informational completion, not an incomplete action.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self {
            Self::CheckQuantity(action) => {
                if !action.has_item_reference() {
                    missing.push("item_name");
                }
                if let Some(customer) = &action.customer {
                    missing.extend(customer.missing_fields());
                }
            }
            Self::PlaceOrder(action) => {
                if action.items.is_empty()
                    || action.items.iter().any(|item| item.item_name.trim().is_empty())
                {
                    missing.push("items");
                }
                if blank(&action.delivery_address) {
                    missing.push("delivery_address");
                }
                missing.extend(customer_missing(&action.customer));
            }
            Self::UpdateOrder(action) => {
                if blank(&action.order_code) {
                    missing.push("order_code");
                }
                if action.changes.as_ref().map_or(true, OrderChanges::is_empty) {
                    missing.push("changes");
                }
                missing.extend(customer_missing(&action.customer));
            }
        }
        missing
    }

    /// The model may flag its own payload as not yet ready.
    pub fn model_marked_incomplete(&self) -> bool {
        let complete = match self {
            Self::CheckQuantity(action) => action.complete,
            Self::PlaceOrder(action) => action.complete,
            Self::UpdateOrder(action) => action.complete,
        };
        complete == Some(false)
    }

    /// True when the payload should produce a webhook dispatch. A
    /// CHECK_QUANTITY payload without customer contact stays informational.
    pub fn is_dispatchable(&self) -> bool {
        if self.model_marked_incomplete() || !self.missing_fields().is_empty() {
            return false;
        }
        match self {
            Self::CheckQuantity(action) => {
                action.customer.as_ref().is_some_and(Customer::is_complete)
            }
            Self::PlaceOrder(_) | Self::UpdateOrder(_) => true,
        }
    }
}

fn customer_missing(customer: &Option<Customer>) -> Vec<&'static str> {
    match customer {
        Some(customer) => customer.missing_fields(),
        None => vec!["customer.name", "customer.phone"],
    }
}
