//! Static menu for Spice Bazaar Irvine.
//!
//! The table is the price authority for the whole process: whatever price the
//! dialogue agent supplies, a cart entry for an item on this menu always
//! carries the price listed here. Names are compared as exact strings.

/// Menu as (exact item name, unit price in USD).
pub static MENU: &[(&str, f64)] = &[
    // Appetizers
    ("Vegetable Samosa", 6.49),
    ("Samosa Chaat", 8.99),
    ("Onion Pakora", 6.99),
    ("Paneer Pakora", 8.49),
    ("Chicken 65", 11.99),
    ("Gobi 65", 9.99),
    ("Gobi Manchurian", 10.49),
    ("Chilli Paneer", 10.99),
    ("Chilli Chicken", 11.99),
    ("Cut Mirchi", 7.49),
    ("Masala Vada", 6.99),
    ("Medu Vada", 6.99),
    ("Sambar Vada", 7.99),
    ("Curd Vada", 7.99),
    ("Punugulu", 6.99),
    // Idli
    ("Idli", 6.99),
    ("Sambar Idli", 7.99),
    ("Ghee Karam Idli", 8.49),
    ("Mini Idli Sambar", 8.49),
    ("Fried Idli", 7.99),
    // Dosas
    ("Plain Dosa", 9.99),
    ("Masala Dosa", 11.49),
    ("Mysore Masala Dosa", 12.49),
    ("Onion Dosa", 10.99),
    ("Onion Chilli Dosa", 11.49),
    ("Ghee Roast", 11.99),
    ("Ghee Karam Dosa", 12.49),
    ("Paper Dosa", 10.99),
    ("Paper Masala Dosa", 12.99),
    ("Rava Dosa", 11.99),
    ("Rava Masala Dosa", 13.49),
    ("Onion Rava Dosa", 12.99),
    ("Cheese Dosa", 11.99),
    ("Cheese Masala Dosa", 12.99),
    ("Paneer Dosa", 12.99),
    ("Egg Dosa", 11.99),
    ("Chicken Dosa", 13.99),
    ("Spring Dosa", 12.49),
    ("Set Dosa", 10.99),
    ("Pesarattu", 11.49),
    ("Pesarattu Upma", 12.49),
    // Uthappam
    ("Plain Uthappam", 10.49),
    ("Onion Uthappam", 11.49),
    ("Tomato Uthappam", 11.49),
    ("Mixed Vegetable Uthappam", 12.49),
    ("Podi Uthappam", 11.99),
    // Chaat
    ("Pani Puri", 7.49),
    ("Sev Puri", 7.99),
    ("Bhel Puri", 7.99),
    ("Dahi Puri", 8.49),
    ("Papdi Chaat", 8.49),
    ("Aloo Tikki Chaat", 8.99),
    // Curries - vegetarian
    ("Dal Tadka", 12.99),
    ("Dal Makhani", 13.99),
    ("Chana Masala", 12.99),
    ("Aloo Gobi", 12.99),
    ("Bhindi Masala", 13.49),
    ("Baingan Bharta", 13.49),
    ("Palak Paneer", 14.49),
    ("Paneer Butter Masala", 14.99),
    ("Paneer Tikka Masala", 14.99),
    ("Kadai Paneer", 14.99),
    ("Malai Kofta", 14.49),
    ("Vegetable Korma", 13.49),
    ("Mushroom Masala", 13.99),
    // Curries - non-vegetarian
    ("Butter Chicken", 15.99),
    ("Chicken Tikka Masala", 15.99),
    ("Chicken Curry", 14.99),
    ("Kadai Chicken", 15.49),
    ("Chicken Chettinad", 15.99),
    ("Andhra Chicken Curry", 15.99),
    ("Goat Curry", 17.99),
    ("Goat Chettinad", 18.49),
    ("Lamb Rogan Josh", 17.99),
    ("Shrimp Curry", 16.99),
    ("Shrimp Masala", 17.49),
    ("Fish Pulusu", 16.99),
    ("Egg Masala", 13.49),
    // Biryani
    ("Vegetable Biryani", 13.99),
    ("Egg Biryani", 14.49),
    ("Chicken Dum Biryani", 15.99),
    ("Chicken 65 Biryani", 16.99),
    ("Goat Biryani", 18.99),
    ("Shrimp Biryani", 17.99),
    ("Paneer Biryani", 14.99),
    // Rice and noodles
    ("Lemon Rice", 10.99),
    ("Tamarind Rice", 10.99),
    ("Curd Rice", 9.99),
    ("Sambar Rice", 10.99),
    ("Vegetable Fried Rice", 11.99),
    ("Egg Fried Rice", 12.49),
    ("Chicken Fried Rice", 13.49),
    ("Vegetable Noodles", 11.99),
    ("Egg Noodles", 12.49),
    ("Chicken Noodles", 13.49),
    // Breads
    ("Butter Naan", 3.49),
    ("Garlic Naan", 3.99),
    ("Plain Naan", 2.99),
    ("Tandoori Roti", 2.99),
    ("Butter Roti", 3.29),
    ("Chapati", 2.99),
    ("Poori", 8.99),
    ("Chole Bhature", 12.49),
    ("Parotta", 3.99),
    ("Kothu Parotta", 13.49),
    ("Curry Parotta", 13.49),
    // Tandoori
    ("Tandoori Chicken Half", 13.99),
    ("Tandoori Chicken Full", 22.99),
    ("Chicken Tikka Kebab", 14.99),
    ("Paneer Tikka Kebab", 13.99),
    ("Tandoori Shrimp", 17.99),
    // South Indian combos
    ("Andhra Veg Meals", 15.99),
    ("Andhra Non-Veg Meals", 18.99),
    ("Curd Rice Combo", 11.99),
    ("Tiffin Combo", 14.99),
    // Desserts
    ("Gulab Jamun", 5.49),
    ("Rasmalai", 5.99),
    ("Gajar Halwa", 6.49),
    ("Double Ka Meetha", 6.49),
    ("Kesari", 5.49),
    ("Payasam", 5.99),
    // Beverages
    ("Mango Lassi", 6.50),
    ("Sweet Lassi", 5.49),
    ("Salt Lassi", 5.49),
    ("Masala Chai", 3.49),
    ("Filter Coffee", 3.99),
    ("Badam Milk", 4.99),
    ("Buttermilk", 3.99),
    ("Fresh Lime Soda", 4.49),
    ("Mango Juice", 4.99),
    ("Thums Up", 2.99),
    ("Limca", 2.99),
    ("Bottled Water", 1.99),
];

/// Exact-name price lookup. Case, whitespace, and punctuation significant.
pub fn price(name: &str) -> Option<f64> {
    MENU.iter()
        .find(|(item, _)| *item == name)
        .map(|&(_, price)| price)
}

/// Menu search for the agent: exact match first, then a case-insensitive
/// substring match so near-miss queries still resolve to a priced item.
pub fn search(query: &str) -> Option<(&'static str, f64)> {
    if let Some(hit) = MENU.iter().find(|(item, _)| *item == query) {
        return Some(*hit);
    }

    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    MENU.iter()
        .find(|(item, _)| item.to_lowercase().contains(&needle))
        .copied()
}

/// Render the menu as one "name - price" line per item, for the agent prompt.
pub fn menu_text() -> String {
    MENU.iter()
        .map(|(name, price)| format!("{name} - {price:.2}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_lookup() {
        assert_eq!(price("Masala Dosa"), Some(11.49));
        assert_eq!(price("Mango Lassi"), Some(6.50));
        assert_eq!(price("masala dosa"), None); // exact strings only
        assert_eq!(price("Pizza"), None);
    }

    #[test]
    fn test_search_falls_back_to_substring() {
        assert_eq!(search("Masala Dosa"), Some(("Masala Dosa", 11.49)));
        let (name, _) = search("mysore").unwrap();
        assert_eq!(name, "Mysore Masala Dosa");
        assert_eq!(search("sushi"), None);
        assert_eq!(search("   "), None);
    }

    #[test]
    fn test_menu_has_no_duplicate_names() {
        let mut names: Vec<&str> = MENU.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MENU.len());
    }

    #[test]
    fn test_menu_text_lists_every_item() {
        let text = menu_text();
        assert_eq!(text.lines().count(), MENU.len());
        assert!(text.contains("Masala Dosa - 11.49"));
    }
}
