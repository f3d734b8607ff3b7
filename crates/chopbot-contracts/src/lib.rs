use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// One dish on the menu. Loaded at process start, immutable afterwards.
/// Prices are in minor currency units (kobo).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuCategory {
    pub name: String,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Confirmed,
}

/// One cart line. There is at most one line per distinct item id within an
/// order; repeated adds merge into the existing line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub item_id: String,
    pub name: String,
    pub price: i64,
    pub quantity: u32,
}

/// The live cart. Invariant: `total_cost == Σ(price * quantity)` over
/// `items` after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub items: Vec<OrderLine>,
    pub total_cost: i64,
    pub status: OrderStatus,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_cost: 0,
            status: OrderStatus::Draft,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub allergies: BTreeSet<String>,
    #[serde(default)]
    pub frequent_orders: BTreeSet<String>,
}

/// Conversational state carried between turns. The server passes it to and
/// from the model without interpreting it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    #[serde(default)]
    pub previously_mentioned_items: BTreeSet<String>,
    #[serde(default)]
    pub pending_confirmations: Vec<Value>,
    #[serde(default)]
    pub user_preferences: UserPreferences,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Server-side state for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub order: Order,
    pub context: ConversationContext,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

impl Session {
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            order: Order::default(),
            context: ConversationContext::default(),
            chat_history: Vec::new(),
        }
    }
}

/// Immutable snapshot of a confirmed order, archived independently of the
/// live session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedOrder {
    pub id: String,
    pub placed_at: String,
    pub customer_info: Value,
    pub items: Vec<OrderLine>,
    pub total_cost: i64,
}

/// The structured-protocol payload: the single JSON object the model must
/// return per turn. Treated as untrusted input; the server sanitizes it
/// before applying.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModelTurn {
    pub user_intent: String,
    pub response: String,
    pub current_order: Order,
    #[serde(default)]
    pub item: Option<Value>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub context: ConversationContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuResponse {
    pub categories: Vec<MenuCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    pub message: String,
    pub current_order: Order,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub order: Order,
    pub context: ConversationContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_intent: Option<String>,
    pub current_order: Order,
    pub context: ConversationContext,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompleteOrderRequest {
    #[serde(default)]
    pub customer_info: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOrderResponse {
    pub message: String,
    pub order: CompletedOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_status_uses_snake_case_wire_form() {
        assert_eq!(
            serde_json::to_value(OrderStatus::Draft).unwrap(),
            json!("draft")
        );
        assert_eq!(
            serde_json::to_value(OrderStatus::Confirmed).unwrap(),
            json!("confirmed")
        );
    }

    #[test]
    fn chat_request_rejects_unknown_fields() {
        let raw = json!({"message": "hi", "sessionId": "s1", "bogus": true});
        assert!(serde_json::from_value::<ChatRequest>(raw).is_err());
    }

    #[test]
    fn model_turn_parses_minimal_payload() {
        let raw = json!({
            "userIntent": "add_item",
            "response": "Added!",
            "currentOrder": {"items": [], "totalCost": 0, "status": "draft"},
            "context": {}
        });
        let turn: ModelTurn = serde_json::from_value(raw).unwrap();
        assert_eq!(turn.user_intent, "add_item");
        assert!(!turn.requires_confirmation);
        assert!(turn.suggestions.is_empty());
    }
}
