//! Near-duplicate detection over recipe fingerprints.

use std::collections::HashSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::recipe::Recipe;
use super::similarity::{ingredient_name, normalize};

/// Thresholds above which two fingerprints count as the same recipe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupThresholds {
    pub title: f64,
    pub ingredients: f64,
}

impl Default for DedupThresholds {
    fn default() -> Self {
        Self {
            title: 0.7,
            ingredients: 0.6,
        }
    }
}

/// Normalized `(title, ingredient multiset)` signature of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupFingerprint {
    pub title: String,
    /// Ingredient names, quantities and units stripped, sorted.
    pub ingredients: Vec<String>,
    /// Hex SHA-256 of the normalized signature; equal keys are exact duplicates.
    pub key: String,
}

impl DedupFingerprint {
    pub fn of(recipe: &Recipe) -> Self {
        let title = normalize(&recipe.title);
        let mut ingredients: Vec<String> = recipe
            .ingredients
            .iter()
            .map(|line| ingredient_name(line))
            .filter(|name| !name.is_empty())
            .collect();
        ingredients.sort();

        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        for name in &ingredients {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
        }
        let key = hex::encode(hasher.finalize());

        Self {
            title,
            ingredients,
            key,
        }
    }

    fn ingredient_text(&self) -> String {
        self.ingredients.join(" ")
    }
}

/// Why a fingerprint was judged a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMatch {
    /// Normalized title of the fingerprint already in the index.
    pub existing_title: String,
    pub title_similarity: f64,
    pub ingredient_similarity: f64,
}

impl DuplicateMatch {
    /// Single figure for diagnostics: the weaker of the two signals.
    pub fn similarity(&self) -> f64 {
        self.title_similarity.min(self.ingredient_similarity)
    }
}

/// Fingerprints of recipes already accepted.
///
/// No two stored fingerprints are duplicates of each other: candidates are
/// checked before insertion and rejected on a match.
#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    thresholds: DedupThresholds,
    entries: Vec<DedupFingerprint>,
    keys: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: DedupThresholds) -> Self {
        Self {
            thresholds,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    /// Find a stored fingerprint that `fingerprint` duplicates.
    ///
    /// Both the titles and the ingredient sets must match. A recipe without
    /// ingredients never duplicates anything, since it can still contribute
    /// other fields to a merge.
    pub fn find_duplicate(&self, fingerprint: &DedupFingerprint) -> Option<DuplicateMatch> {
        if fingerprint.ingredients.is_empty() {
            return None;
        }

        if self.keys.contains(&fingerprint.key) {
            return Some(DuplicateMatch {
                existing_title: fingerprint.title.clone(),
                title_similarity: 1.0,
                ingredient_similarity: 1.0,
            });
        }

        let ingredients = fingerprint.ingredient_text();
        self.entries
            .iter()
            .filter(|existing| !existing.ingredients.is_empty())
            .filter_map(|existing| {
                let title_similarity =
                    strsim::normalized_levenshtein(&fingerprint.title, &existing.title);
                if title_similarity <= self.thresholds.title {
                    return None;
                }
                let ingredient_similarity =
                    strsim::normalized_levenshtein(&ingredients, &existing.ingredient_text());
                if ingredient_similarity <= self.thresholds.ingredients {
                    return None;
                }
                Some(DuplicateMatch {
                    existing_title: existing.title.clone(),
                    title_similarity,
                    ingredient_similarity,
                })
            })
            .max_by(|a, b| a.similarity().total_cmp(&b.similarity()))
    }

    /// Insert `recipe` unless it duplicates an existing entry.
    pub fn check_and_insert(&mut self, recipe: &Recipe) -> Result<DedupFingerprint, DuplicateMatch> {
        let fingerprint = DedupFingerprint::of(recipe);
        if let Some(duplicate) = self.find_duplicate(&fingerprint) {
            return Err(duplicate);
        }
        self.keys.insert(fingerprint.key.clone());
        self.entries.push(fingerprint.clone());
        Ok(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookies(title: &str, ingredients: &[&str]) -> Recipe {
        let mut recipe = Recipe::new(title);
        recipe.ingredients = ingredients.iter().map(|s| s.to_string()).collect();
        recipe
    }

    #[test]
    fn test_near_duplicate_rejected() {
        let mut index = DedupIndex::new();
        index
            .check_and_insert(&cookies(
                "Chocolate Chip Cookies",
                &["flour", "sugar", "butter", "eggs"],
            ))
            .unwrap();

        let duplicate = index
            .check_and_insert(&cookies(
                "Chocolate Chip Cookie",
                &["flour", "sugar", "butter", "eggs"],
            ))
            .unwrap_err();

        assert!(duplicate.similarity() >= 0.6);
        assert_eq!(duplicate.ingredient_similarity, 1.0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_quantities_do_not_matter() {
        let mut index = DedupIndex::new();
        index
            .check_and_insert(&cookies(
                "Chocolate Chip Cookies",
                &["2 cups flour", "1 cup sugar", "1/2 cup butter", "2 eggs"],
            ))
            .unwrap();
        assert!(index
            .check_and_insert(&cookies(
                "chocolate chip cookies",
                &["eggs", "butter", "sugar", "flour"],
            ))
            .is_err());
    }

    #[test]
    fn test_different_recipes_accepted() {
        let mut index = DedupIndex::new();
        index
            .check_and_insert(&cookies(
                "Chocolate Chip Cookies",
                &["flour", "sugar", "butter", "eggs", "chocolate chips"],
            ))
            .unwrap();
        index
            .check_and_insert(&cookies(
                "Beef Stew",
                &["beef", "carrots", "potatoes", "stock"],
            ))
            .unwrap();
        // Same title, unrelated ingredients
        index
            .check_and_insert(&cookies(
                "Chocolate Chip Cookies",
                &["almond meal", "coconut oil", "maple syrup"],
            ))
            .unwrap();
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_missing_ingredients_never_duplicate() {
        let mut index = DedupIndex::new();
        index
            .check_and_insert(&cookies("Banana Bread", &["bananas", "flour"]))
            .unwrap();
        index.check_and_insert(&Recipe::new("Banana Bread")).unwrap();
        index.check_and_insert(&Recipe::new("Banana Bread")).unwrap();
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = DedupFingerprint::of(&cookies("Soup", &["leeks", "potatoes"]));
        let b = DedupFingerprint::of(&cookies("soup!", &["potatoes", "leeks"]));
        assert_eq!(a.key, b.key);
        assert_eq!(a.ingredients, vec!["leek", "potatoe"]);
    }
}
