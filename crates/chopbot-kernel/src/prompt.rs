use chopbot_contracts::{ChatMessage, ChatRole, Order};

use crate::menu;

/// Which reply contract the model is held to. A deployment picks exactly one
/// via config; the two are never mixed within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Free text with inline `ORDER_*` directives, merged through the
    /// mutation engine.
    Directive,
    /// One JSON turn object per reply; the cart is replaced wholesale.
    Structured,
}

impl Protocol {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "directive" => Some(Self::Directive),
            "structured" => Some(Self::Structured),
            _ => None,
        }
    }
}

/// One message in the list sent to the model API.
#[derive(Debug, Clone)]
pub struct ModelMessage {
    pub role: &'static str,
    pub content: String,
}

/// System prompt + persisted history + the current user message.
pub fn build_messages(
    protocol: Protocol,
    order: &Order,
    history: &[ChatMessage],
    user_message: &str,
) -> Vec<ModelMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ModelMessage {
        role: "system",
        content: system_prompt(protocol, order),
    });
    for entry in history {
        messages.push(ModelMessage {
            role: match entry.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: entry.content.clone(),
        });
    }
    messages.push(ModelMessage {
        role: "user",
        content: user_message.to_string(),
    });
    messages
}

pub fn system_prompt(protocol: Protocol, order: &Order) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are ChopBot, the friendly ordering assistant for a Nigerian restaurant. \
         Help the customer build their order from the menu below. Only ever offer \
         dishes that appear on the menu; if something is not on it, say so politely.\n\n",
    );
    prompt.push_str("MENU\n");
    prompt.push_str(&render_menu());
    prompt.push_str("\nCURRENT ORDER\n");
    prompt.push_str(&render_order(order));
    prompt.push('\n');
    match protocol {
        Protocol::Directive => prompt.push_str(DIRECTIVE_RULES),
        Protocol::Structured => prompt.push_str(STRUCTURED_RULES),
    }
    prompt
}

const DIRECTIVE_RULES: &str = "\
When the customer changes their order, embed one directive per change inside \
your reply, using exactly these forms:\n\
ORDER_ADD:<item name>|QUANTITY:<positive integer>\n\
ORDER_REMOVE:<item name>\n\
ORDER_UPDATE:<item name>|QUANTITY:<non-negative integer>\n\
Use the item names exactly as they appear on the menu. The directives are \
stripped out before the customer sees your reply, so write the surrounding \
text as if they were not there.\n";

const STRUCTURED_RULES: &str = "\
Reply with a single JSON object and nothing else. No markdown, no prose \
outside the object. The object must have exactly these keys:\n\
{\"userIntent\": one of \"greeting\", \"question\", \"add_item\", \
\"remove_item\", \"update_quantity\", \"confirm\", \"complete\", \
\"response\": <text to show the customer>, \
\"currentOrder\": {\"items\": [{\"itemId\", \"name\", \"price\", \
\"quantity\"}], \"totalCost\", \"status\": \"draft\"}, \
\"item\": <the item just discussed or null>, \
\"requiresConfirmation\": <bool>, \
\"suggestions\": [<up to three menu item names>], \
\"context\": {\"previouslyMentionedItems\", \"pendingConfirmations\", \
\"userPreferences\": {\"allergies\", \"frequentOrders\"}}}\n\
currentOrder must always hold the complete cart after this turn, using item \
ids and prices from the menu.\n";

pub fn render_menu() -> String {
    let mut out = String::new();
    for category in menu::catalog() {
        out.push_str(&category.name);
        out.push('\n');
        for item in &category.items {
            out.push_str(&format!(
                "- {} ({}) — {}: {}\n",
                item.name,
                item.id,
                format_price(item.price),
                item.description
            ));
        }
    }
    out
}

pub fn render_order(order: &Order) -> String {
    if order.items.is_empty() {
        return "(empty)\n".to_string();
    }
    let mut out = String::new();
    for line in &order.items {
        out.push_str(&format!(
            "- {} x{} @ {}\n",
            line.name,
            line.quantity,
            format_price(line.price)
        ));
    }
    out.push_str(&format!("Total: {}\n", format_price(order.total_cost)));
    out
}

fn format_price(kobo: i64) -> String {
    format!("₦{}.{:02}", kobo / 100, kobo % 100)
}
