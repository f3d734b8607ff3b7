use chopbot_contracts::{CompletedOrder, MenuItem, Order, OrderLine, OrderStatus};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("order has no items")]
    Empty,
}

/// Adds `quantity` of `item` to the cart, merging into an existing line for
/// the same item id. A quantity outside `1..=u32::MAX` is rejected as a
/// no-op; a zero or negative line is never created.
pub fn add_item(order: &mut Order, item: &MenuItem, quantity: i64) {
    let Some(qty) = positive_quantity(quantity) else {
        warn!(item_id = %item.id, quantity, "rejected add with out-of-range quantity");
        return;
    };
    match order.items.iter_mut().find(|line| line.item_id == item.id) {
        Some(line) => line.quantity = line.quantity.saturating_add(qty),
        None => order.items.push(OrderLine {
            item_id: item.id.clone(),
            name: item.name.clone(),
            price: item.price,
            quantity: qty,
        }),
    }
    recompute_total(order);
}

/// Deletes the line for `item_id`. Absence is a no-op, not an error.
pub fn remove_item(order: &mut Order, item_id: &str) {
    order.items.retain(|line| line.item_id != item_id);
    recompute_total(order);
}

/// Sets the line for `item_id` to an exact quantity. Zero or less removes the
/// line; an absent line is a no-op.
pub fn update_quantity(order: &mut Order, item_id: &str, quantity: i64) {
    if quantity <= 0 {
        remove_item(order, item_id);
        return;
    }
    let Some(qty) = positive_quantity(quantity) else {
        warn!(item_id, quantity, "rejected update with out-of-range quantity");
        return;
    };
    if let Some(line) = order.items.iter_mut().find(|line| line.item_id == item_id) {
        line.quantity = qty;
    }
    recompute_total(order);
}

/// Recomputes the total from scratch. Called after every mutation so the
/// total can never drift from the lines.
pub fn recompute_total(order: &mut Order) {
    order.total_cost = order
        .items
        .iter()
        .map(|line| line.price * i64::from(line.quantity))
        .sum();
}

/// Confirms the order and returns its immutable snapshot, then resets the
/// live order to an empty draft. The id and timestamp come from the caller
/// so this stays deterministic.
pub fn finalize(
    order: &mut Order,
    id: &str,
    placed_at: &str,
    customer_info: Value,
) -> Result<CompletedOrder, OrderError> {
    if order.items.is_empty() {
        return Err(OrderError::Empty);
    }
    order.status = OrderStatus::Confirmed;
    let snapshot = CompletedOrder {
        id: id.to_string(),
        placed_at: placed_at.to_string(),
        customer_info,
        items: order.items.clone(),
        total_cost: order.total_cost,
    };
    *order = Order::default();
    Ok(snapshot)
}

fn positive_quantity(quantity: i64) -> Option<u32> {
    if quantity <= 0 {
        return None;
    }
    u32::try_from(quantity).ok()
}
