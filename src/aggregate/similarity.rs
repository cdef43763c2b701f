//! String similarity shared by best-match selection and deduplication.

use std::sync::LazyLock;

use regex::Regex;

static QUANTITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\d½⅓⅔¼¾⅛/.\-–x]+$").expect("quantity pattern should compile")
});

/// Measurement words dropped from ingredient lines (already plural-folded).
const UNITS: &[&str] = &[
    "cup", "c", "tablespoon", "tbsp", "tbs", "teaspoon", "tsp", "gram", "g", "kg", "kilogram",
    "ml", "l", "liter", "litre", "oz", "ounce", "lb", "pound", "pinch", "dash", "can", "package",
    "pkg", "stick", "clove", "slice", "piece", "handful", "bunch", "quart", "qt", "pint", "pt",
    "large", "medium", "small", "of",
];

/// Fold a trailing plural: "berries" → "berry", "eggs" → "egg".
fn fold_plural(word: &str) -> String {
    if word.len() > 4 {
        if let Some(stem) = word.strip_suffix("ies") {
            return format!("{}y", stem);
        }
    }
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// Lowercase, strip punctuation, collapse whitespace, fold plurals.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .map(fold_plural)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized edit-distance ratio between two strings, 0.0 to 1.0.
///
/// Case, punctuation and simple plurals are ignored.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize(a), &normalize(b))
}

/// Reduce an ingredient line to the ingredient's name.
///
/// "2 cups all-purpose flour, sifted" → "all purpose flour"
pub fn ingredient_name(line: &str) -> String {
    let without_notes = line.split([',', '(', ';']).next().unwrap_or(line);

    without_notes
        .split_whitespace()
        .filter(|token| !QUANTITY_PATTERN.is_match(token))
        .map(normalize)
        .filter(|word| !word.is_empty())
        .flat_map(|word| {
            word.split(' ')
                // "200g" → "g"
                .map(|w| w.trim_start_matches(|c: char| c.is_ascii_digit()))
                .filter(|w| !w.is_empty() && !UNITS.contains(w))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Grandma's   BEST Cookies!! "), "grandma best cooky");
        assert_eq!(normalize("Berries & Eggs"), "berry egg");
        assert_eq!(normalize("Glass"), "glass");
        assert_eq!(normalize("Peas"), "pea");
    }

    #[test]
    fn test_similarity_ignores_case_and_punctuation() {
        assert_eq!(similarity("Banana Bread", "banana-bread!"), 1.0);
        assert_eq!(similarity("Pancake", "Pancakes"), 1.0);
        assert!(similarity("Banana Bread", "Beef Stew") < 0.5);
    }

    #[test]
    fn test_similarity_near_titles() {
        let score = similarity("Chocolate Chip Cookies", "Chocolate Chip Cookie");
        assert!(score > 0.85, "score was {}", score);
    }

    #[test]
    fn test_empty_strings() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("bread", ""), 0.0);
    }

    #[test]
    fn test_ingredient_name() {
        assert_eq!(ingredient_name("2 cups all-purpose flour, sifted"), "all purpose flour");
        assert_eq!(ingredient_name("1/2 tsp salt"), "salt");
        assert_eq!(ingredient_name("3 large eggs"), "egg");
        assert_eq!(ingredient_name("½ cup butter (softened)"), "butter");
        assert_eq!(ingredient_name("sugar"), "sugar");
        assert_eq!(ingredient_name("200g dark chocolate"), "dark chocolate");
    }
}
