use chopbot_contracts::{MenuCategory, MenuItem};
use std::sync::OnceLock;

static CATALOG: OnceLock<Vec<MenuCategory>> = OnceLock::new();

/// The full catalog in its fixed iteration order. Resolution ties are broken
/// by this order.
pub fn catalog() -> &'static [MenuCategory] {
    CATALOG.get_or_init(build_catalog).as_slice()
}

pub fn items() -> impl Iterator<Item = &'static MenuItem> {
    catalog().iter().flat_map(|category| category.items.iter())
}

pub fn find_by_id(id: &str) -> Option<&'static MenuItem> {
    items().find(|item| item.id == id)
}

/// Maps free text naming a dish to exactly one catalog item, or none.
///
/// Precedence: exact case-insensitive name match, then substring containment
/// in either direction, then first-token equality. No match means the caller
/// must treat the name as unknown, never guess.
pub fn resolve(query: &str) -> Option<&'static MenuItem> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return None;
    }

    if let Some(item) = items().find(|item| item.name.to_lowercase() == q) {
        return Some(item);
    }

    if let Some(item) = items().find(|item| {
        let name = item.name.to_lowercase();
        name.contains(&q) || q.contains(&name)
    }) {
        return Some(item);
    }

    let q_first = q.split_whitespace().next()?;
    items().find(|item| {
        item.name
            .to_lowercase()
            .split_whitespace()
            .next()
            .map(|first| first == q_first)
            .unwrap_or(false)
    })
}

fn item(id: &str, name: &str, price: i64, description: &str) -> MenuItem {
    MenuItem {
        id: id.to_string(),
        name: name.to_string(),
        price,
        description: description.to_string(),
    }
}

// Prices are in kobo.
fn build_catalog() -> Vec<MenuCategory> {
    vec![
        MenuCategory {
            name: "Mains".to_string(),
            items: vec![
                item(
                    "jollof_rice",
                    "Jollof Rice",
                    350_000,
                    "Smoky party-style jollof with fried beef or chicken",
                ),
                item(
                    "fried_rice",
                    "Fried Rice",
                    350_000,
                    "Nigerian fried rice with mixed vegetables and liver",
                ),
                item(
                    "pounded_yam_egusi",
                    "Pounded Yam and Egusi",
                    420_000,
                    "Pounded yam served with egusi soup and assorted meat",
                ),
                item(
                    "amala_ewedu",
                    "Amala and Ewedu",
                    380_000,
                    "Amala with ewedu, gbegiri and goat meat",
                ),
                item(
                    "ofada_rice",
                    "Ofada Rice",
                    400_000,
                    "Ofada rice with ayamase designer stew",
                ),
            ],
        },
        MenuCategory {
            name: "Sides".to_string(),
            items: vec![
                item(
                    "suya",
                    "Suya",
                    250_000,
                    "Spiced grilled beef skewers with yaji, onions and tomatoes",
                ),
                item(
                    "moi_moi",
                    "Moi Moi",
                    120_000,
                    "Steamed bean pudding with egg and fish",
                ),
                item(
                    "fried_plantain",
                    "Fried Plantain",
                    100_000,
                    "Sweet dodo, fried golden",
                ),
                item(
                    "pepper_soup",
                    "Pepper Soup",
                    280_000,
                    "Catfish pepper soup with scent leaves",
                ),
            ],
        },
        MenuCategory {
            name: "Snacks".to_string(),
            items: vec![
                item(
                    "puff_puff",
                    "Puff Puff",
                    80_000,
                    "Soft fried dough balls, lightly sweetened",
                ),
                item(
                    "chin_chin",
                    "Chin Chin",
                    90_000,
                    "Crunchy fried pastry bites",
                ),
            ],
        },
        MenuCategory {
            name: "Drinks".to_string(),
            items: vec![
                item(
                    "chapman",
                    "Chapman",
                    150_000,
                    "Classic Chapman cocktail with grenadine and cucumber",
                ),
                item("zobo", "Zobo", 100_000, "Chilled hibiscus drink with ginger"),
                item(
                    "palm_wine",
                    "Palm Wine",
                    180_000,
                    "Fresh palm wine, served chilled",
                ),
            ],
        },
    ]
}
