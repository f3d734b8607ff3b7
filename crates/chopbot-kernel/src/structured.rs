//! The structured protocol: the model returns exactly one JSON object per
//! turn (`ModelTurn`) and is the sole authority over cart state. The payload
//! crosses a trust boundary, so it is sanitized before anything is applied:
//! quantities must be positive, every item id must exist in the catalog,
//! prices and names are re-read from the catalog, and the total is
//! recomputed server-side. Any violation rejects the whole turn; there is no
//! partial extraction and no retry.

use chopbot_contracts::{ModelTurn, Order, OrderStatus};
use std::collections::BTreeSet;

use crate::{menu, order};

/// The user intent that signals the UI to trigger finalization.
pub const INTENT_COMPLETE: &str = "complete";

pub fn parse_model_turn(raw: &str) -> Result<ModelTurn, String> {
    let body = strip_code_fence(raw);
    let mut turn: ModelTurn = serde_json::from_str(body)
        .map_err(|err| format!("model output is not a valid turn object: {err}"))?;
    sanitize_order(&mut turn.current_order)?;
    Ok(turn)
}

// Models routinely wrap JSON in a markdown fence even when told not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    match rest.rsplit_once("```") {
        Some((inner, _)) => inner.trim(),
        None => rest.trim(),
    }
}

fn sanitize_order(cart: &mut Order) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    for line in &mut cart.items {
        if line.quantity == 0 {
            return Err(format!("line for {:?} has zero quantity", line.item_id));
        }
        if !seen.insert(line.item_id.clone()) {
            return Err(format!("duplicate line for {:?}", line.item_id));
        }
        let item = menu::find_by_id(&line.item_id)
            .ok_or_else(|| format!("unknown menu item id {:?}", line.item_id))?;
        // Monetary fields from the model are never trusted.
        line.price = item.price;
        line.name = item.name.clone();
    }
    cart.status = OrderStatus::Draft;
    order::recompute_total(cart);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn_with_order(items: serde_json::Value) -> String {
        json!({
            "userIntent": "add_item",
            "response": "Done!",
            "currentOrder": {"items": items, "totalCost": 0, "status": "draft"},
            "context": {}
        })
        .to_string()
    }

    #[test]
    fn parses_a_clean_turn_and_reprices_from_the_catalog() {
        let raw = turn_with_order(json!([
            {"itemId": "jollof_rice", "name": "jollof", "price": 1, "quantity": 2}
        ]));
        let turn = parse_model_turn(&raw).unwrap();
        let line = &turn.current_order.items[0];
        assert_eq!(line.name, "Jollof Rice");
        assert_eq!(line.price, menu::find_by_id("jollof_rice").unwrap().price);
        assert_eq!(turn.current_order.total_cost, line.price * 2);
    }

    #[test]
    fn tolerates_markdown_fenced_json() {
        let raw = format!("```json\n{}\n```", turn_with_order(json!([])));
        let turn = parse_model_turn(&raw).unwrap();
        assert_eq!(turn.user_intent, "add_item");
    }

    #[test]
    fn non_json_output_is_rejected() {
        assert!(parse_model_turn("I added that for you!").is_err());
    }

    #[test]
    fn unknown_item_id_rejects_the_whole_turn() {
        let raw = turn_with_order(json!([
            {"itemId": "pizza", "name": "Pizza", "price": 100, "quantity": 1}
        ]));
        assert!(parse_model_turn(&raw).is_err());
    }

    #[test]
    fn zero_quantity_rejects_the_whole_turn() {
        let raw = turn_with_order(json!([
            {"itemId": "suya", "name": "Suya", "price": 100, "quantity": 0}
        ]));
        assert!(parse_model_turn(&raw).is_err());
    }

    #[test]
    fn duplicate_lines_reject_the_whole_turn() {
        let raw = turn_with_order(json!([
            {"itemId": "suya", "name": "Suya", "price": 100, "quantity": 1},
            {"itemId": "suya", "name": "Suya", "price": 100, "quantity": 2}
        ]));
        assert!(parse_model_turn(&raw).is_err());
    }

    #[test]
    fn confirmed_status_from_the_model_is_forced_back_to_draft() {
        let raw = json!({
            "userIntent": "complete",
            "response": "Order placed!",
            "currentOrder": {"items": [], "totalCost": 0, "status": "confirmed"},
            "context": {}
        })
        .to_string();
        let turn = parse_model_turn(&raw).unwrap();
        assert_eq!(turn.current_order.status, OrderStatus::Draft);
        assert_eq!(turn.user_intent, INTENT_COMPLETE);
    }
}
