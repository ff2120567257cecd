//! Shapes validated action payloads into the backend's wire contract.
//!
//! This is the single normalizing choke point between the model and the
//! outside world: each variant has its own pure allow-list transform, so a
//! field reaches the backend only if a transform explicitly copies it.
//! Model-internal bookkeeping (`complete`, echoed identifiers) never does.

use serde::Serialize;

use crate::domain::customer::Customer;
use crate::errors::MappingError;
use crate::intent::{
    ActionData, CheckQuantityAction, Intent, OrderChanges, OrderItem, PlaceOrderAction,
    UpdateOrderAction,
};

/// Transport-level identifiers injected by the orchestrator. Never sourced
/// from model output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationMeta {
    pub conversation_id: String,
    pub company_id: String,
    pub channel: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPayload {
    pub name: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl From<&Customer> for CustomerPayload {
    fn from(customer: &Customer) -> Self {
        Self {
            name: customer.name.trim().to_string(),
            phone: customer.phone.trim().to_string(),
            email: customer.email.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    pub item_name: String,
    pub quantity: i64,
}

impl From<&OrderItem> for OrderItemPayload {
    fn from(item: &OrderItem) -> Self {
        Self {
            service_id: item.record_id.clone(),
            item_name: item.item_name.trim().to_string(),
            quantity: item.quantity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockVerificationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreationMetadata {
    pub items: Vec<OrderItemPayload>,
    pub delivery_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdateMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItemPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WebhookMetadata {
    StockVerification(StockVerificationMetadata),
    OrderCreation(OrderCreationMetadata),
    OrderUpdate(OrderUpdateMetadata),
}

/// The externally-contracted message. camelCase on the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub conversation_id: String,
    pub company_id: String,
    pub channel: String,
    pub event: &'static str,
    pub customer: CustomerPayload,
    pub metadata: WebhookMetadata,
    /// Routing hint for the sink's URL path. Implied by the call path, so it
    /// never appears in the body.
    #[serde(skip)]
    pub order_code: Option<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WebhookMapper;

impl WebhookMapper {
    pub fn new() -> Self {
        Self
    }

    /// Defensively re-checks required fields even though the parser already
    /// validated them; a mismatch here is a bug, not user input.
    pub fn map(
        &self,
        action: &ActionData,
        meta: &ConversationMeta,
    ) -> Result<WebhookPayload, MappingError> {
        match action {
            ActionData::CheckQuantity(action) => map_check_quantity(action, meta),
            ActionData::PlaceOrder(action) => map_place_order(action, meta),
            ActionData::UpdateOrder(action) => map_update_order(action, meta),
        }
    }
}

fn map_check_quantity(
    action: &CheckQuantityAction,
    meta: &ConversationMeta,
) -> Result<WebhookPayload, MappingError> {
    if !action.has_item_reference() {
        return Err(MappingError::MissingField {
            intent: Intent::CheckQuantity,
            field: "item_name",
        });
    }
    let customer = require_customer(Intent::CheckQuantity, &action.customer)?;

    Ok(WebhookPayload {
        conversation_id: meta.conversation_id.clone(),
        company_id: meta.company_id.clone(),
        channel: meta.channel.clone(),
        event: "stock.verify",
        customer,
        metadata: WebhookMetadata::StockVerification(StockVerificationMetadata {
            service_id: non_blank(&action.record_id),
            item_name: non_blank(&action.item_name),
            requested_quantity: action.quantity,
            notes: non_blank(&action.notes),
        }),
        order_code: None,
    })
}

fn map_place_order(
    action: &PlaceOrderAction,
    meta: &ConversationMeta,
) -> Result<WebhookPayload, MappingError> {
    if action.items.is_empty() || action.items.iter().any(|item| item.item_name.trim().is_empty())
    {
        return Err(MappingError::MissingField { intent: Intent::PlaceOrder, field: "items" });
    }
    let delivery_address = non_blank(&action.delivery_address).ok_or(
        MappingError::MissingField { intent: Intent::PlaceOrder, field: "delivery_address" },
    )?;
    let customer = require_customer(Intent::PlaceOrder, &action.customer)?;

    Ok(WebhookPayload {
        conversation_id: meta.conversation_id.clone(),
        company_id: meta.company_id.clone(),
        channel: meta.channel.clone(),
        event: "order.create",
        customer,
        metadata: WebhookMetadata::OrderCreation(OrderCreationMetadata {
            items: action.items.iter().map(OrderItemPayload::from).collect(),
            delivery_address,
            payment_method: non_blank(&action.payment_method),
            notes: non_blank(&action.notes),
        }),
        order_code: None,
    })
}

fn map_update_order(
    action: &UpdateOrderAction,
    meta: &ConversationMeta,
) -> Result<WebhookPayload, MappingError> {
    let order_code = non_blank(&action.order_code).ok_or(MappingError::MissingField {
        intent: Intent::UpdateOrder,
        field: "order_code",
    })?;
    let changes = action
        .changes
        .as_ref()
        .filter(|changes| !changes.is_empty())
        .ok_or(MappingError::MissingField { intent: Intent::UpdateOrder, field: "changes" })?;
    let customer = require_customer(Intent::UpdateOrder, &action.customer)?;

    Ok(WebhookPayload {
        conversation_id: meta.conversation_id.clone(),
        company_id: meta.company_id.clone(),
        channel: meta.channel.clone(),
        event: "order.update",
        customer,
        metadata: WebhookMetadata::OrderUpdate(map_changes(changes)),
        order_code: Some(order_code),
    })
}

fn map_changes(changes: &OrderChanges) -> OrderUpdateMetadata {
    OrderUpdateMetadata {
        items: changes
            .items
            .as_ref()
            .map(|items| items.iter().map(OrderItemPayload::from).collect()),
        delivery_address: non_blank(&changes.delivery_address),
        notes: non_blank(&changes.notes),
    }
}

fn require_customer(
    intent: Intent,
    customer: &Option<Customer>,
) -> Result<CustomerPayload, MappingError> {
    let Some(customer) = customer else {
        return Err(MappingError::MissingField { intent, field: "customer.name" });
    };
    if let Some(field) = customer.missing_fields().first().copied() {
        return Err(MappingError::MissingField { intent, field });
    }
    Ok(CustomerPayload::from(customer))
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|text| !text.is_empty()).map(str::to_string)
}
