//! Textual product refinement.
//!
//! A case declares a product list for the whole project, but each image
//! usually shows only some of them. The captioning output mentions the
//! products that are actually visible, so matching product names against
//! the description text yields a per-image subset. Derived data only - the
//! case's declared list stays authoritative.

/// Return the subset of `products` that textually match `description`,
/// order-preserving and deduplicated.
///
/// Matching is a plain substring check first, then a normalized form with
/// hyphens and spaces stripped and case folded, which tolerates variants
/// like "W-70" vs "W70".
pub fn refine_products(description: &str, products: &[String]) -> Vec<String> {
    let desc_normalized = normalize(description);
    let mut refined: Vec<String> = Vec::new();

    for product in products {
        if refined.contains(product) {
            continue;
        }
        if description.contains(product.as_str()) {
            refined.push(product.clone());
            continue;
        }
        let product_normalized = normalize(product);
        if !product_normalized.is_empty() && desc_normalized.contains(&product_normalized) {
            refined.push(product.clone());
        }
    }

    refined
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['-', ' '], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_exact_substring_match() {
        let refined = refine_products(
            "The room is divided by the Mighty-70 partition.",
            &products(&["Mighty-70", "Softline-30"]),
        );
        assert_eq!(refined, products(&["Mighty-70"]));
    }

    #[test]
    fn test_normalized_match_tolerates_hyphen_variants() {
        let refined = refine_products(
            "A mighty70 partition separates the meeting area.",
            &products(&["Mighty-70"]),
        );
        assert_eq!(refined, products(&["Mighty-70"]));
    }

    #[test]
    fn test_normalized_match_tolerates_spacing_and_case() {
        let refined = refine_products(
            "Fitted with the GLASS SCREEN GS2 along the corridor.",
            &products(&["Glass Screen GS-2"]),
        );
        assert_eq!(refined, products(&["Glass Screen GS-2"]));
    }

    #[test]
    fn test_no_match_yields_empty() {
        let refined = refine_products(
            "An open-plan office with warm wood tones.",
            &products(&["Mighty-70"]),
        );
        assert!(refined.is_empty());
    }

    #[test]
    fn test_order_preserved_and_deduplicated() {
        let refined = refine_products(
            "Softline-30 panels face the Mighty-70 wall; another Softline-30 run closes the back.",
            &products(&["Mighty-70", "Softline-30", "Mighty-70"]),
        );
        assert_eq!(refined, products(&["Mighty-70", "Softline-30"]));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(refine_products("", &products(&["Mighty-70"])).is_empty());
        assert!(refine_products("some text", &[]).is_empty());
    }
}
