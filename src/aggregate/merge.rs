//! Confidence-weighted merge of accepted candidates.

use std::cmp::Ordering;

use super::recipe::{Recipe, SourceCandidate};

/// The outcome of merging one or more candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecipe {
    pub recipe: Recipe,
    /// Contributing source ids, in cascade order.
    pub sources: Vec<String>,
    /// Mean confidence of all contributing candidates.
    pub combined_confidence: f64,
    /// Completeness of the merged record.
    pub combined_completeness: u8,
}

/// Order candidates by preference as a merge base: higher confidence, then
/// earlier in the cascade.
fn base_preference(a: &SourceCandidate, b: &SourceCandidate) -> Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then(b.source_rank.cmp(&a.source_rank))
}

fn fill<T: Clone>(target: &mut Option<T>, other: &Option<T>, is_present: impl Fn(&T) -> bool) {
    if !target.as_ref().is_some_and(&is_present) {
        if let Some(value) = other.as_ref().filter(|v| is_present(*v)) {
            *target = Some(value.clone());
        }
    }
}

fn non_blank(s: &String) -> bool {
    !s.trim().is_empty()
}

/// Fold `other` into `base` without overwriting anything `base` has.
fn merge_into(base: &mut Recipe, other: &Recipe) {
    if !base.has_title() && other.has_title() {
        base.title = other.title.clone();
    }
    fill(&mut base.description, &other.description, non_blank);
    fill(&mut base.image, &other.image, non_blank);
    fill(&mut base.servings, &other.servings, non_blank);
    fill(&mut base.cuisine, &other.cuisine, non_blank);
    fill(&mut base.source_url, &other.source_url, non_blank);

    if !base.has_timing() {
        base.prep_minutes = other.prep_minutes;
        base.cook_minutes = other.cook_minutes;
        base.total_minutes = other.total_minutes;
    }

    if base.nutrition.is_empty() {
        base.nutrition = other.nutrition.clone();
    }

    for tag in &other.tags {
        if !base.tags.contains(tag) {
            base.tags.push(tag.clone());
        }
    }

    if other.ingredients.len() > base.ingredients.len() {
        base.ingredients = other.ingredients.clone();
    }
    if other.instructions.len() > base.instructions.len() {
        base.instructions = other.instructions.clone();
    }
}

/// Merge candidates into a single record.
///
/// The base is the most trusted candidate; every other candidate only
/// fills gaps, adds tags, or supplies a strictly longer ingredient or
/// instruction list. The result is independent of the order of
/// `candidates`. Returns `None` for an empty slice.
pub fn merge_candidates(candidates: &[SourceCandidate]) -> Option<MergedRecipe> {
    let base = candidates.iter().max_by(|a, b| base_preference(a, b))?;

    let mut ordered: Vec<&SourceCandidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.source_rank);

    let mut recipe = base.recipe.clone();
    for candidate in ordered.iter().filter(|c| !std::ptr::eq(**c, base)) {
        merge_into(&mut recipe, &candidate.recipe);
    }

    let combined_confidence =
        candidates.iter().map(|c| c.confidence).sum::<f64>() / candidates.len() as f64;
    let combined_completeness = recipe.completeness();

    Some(MergedRecipe {
        recipe,
        sources: ordered.iter().map(|c| c.source_id.clone()).collect(),
        combined_confidence,
        combined_completeness,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(source: &str, rank: usize, confidence: f64, recipe: Recipe) -> SourceCandidate {
        SourceCandidate::new(recipe, source, confidence, 1.0, rank)
    }

    #[test]
    fn test_fills_gaps_and_averages_confidence() {
        let mut a = Recipe::new("Banana Bread");
        a.ingredients = vec!["3 bananas".into(), "flour".into()];
        a.instructions = vec!["Mash".into(), "Bake".into()];

        let mut b = Recipe::new("Banana Bread");
        b.nutrition.insert("calories".into(), "240".into());
        b.description = Some("Classic loaf".into());

        let merged = merge_candidates(&[
            candidate("a", 0, 90.0, a.clone()),
            candidate("b", 1, 70.0, b),
        ])
        .unwrap();

        assert_eq!(merged.recipe.ingredients, a.ingredients);
        assert_eq!(merged.recipe.instructions, a.instructions);
        assert_eq!(merged.recipe.nutrition.get("calories").unwrap(), "240");
        assert_eq!(merged.recipe.description.as_deref(), Some("Classic loaf"));
        assert!((merged.combined_confidence - 80.0).abs() < 1e-9);
        assert_eq!(merged.combined_completeness, 75);
        assert_eq!(merged.sources, vec!["a", "b"]);
    }

    #[test]
    fn test_base_keeps_its_fields() {
        let mut a = Recipe::new("Pho");
        a.description = Some("From the trusted source".into());
        a.ingredients = vec!["noodles".into(), "beef".into(), "broth".into()];
        let mut b = Recipe::new("Pho Bo");
        b.description = Some("From the noisy source".into());
        b.ingredients = vec!["noodles".into()];

        let merged =
            merge_candidates(&[candidate("b", 0, 60.0, b), candidate("a", 1, 95.0, a)]).unwrap();
        assert_eq!(merged.recipe.title, "Pho");
        assert_eq!(
            merged.recipe.description.as_deref(),
            Some("From the trusted source")
        );
        assert_eq!(merged.recipe.ingredients.len(), 3);
        assert_eq!(merged.sources, vec!["b", "a"]);
    }

    #[test]
    fn test_longer_lists_replace_and_tags_union() {
        let mut a = Recipe::new("Stew");
        a.ingredients = vec!["beef".into()];
        a.tags = vec!["dinner".into(), "winter".into()];
        let mut b = Recipe::new("Stew");
        b.ingredients = vec!["beef".into(), "carrot".into()];
        b.instructions = vec!["Simmer".into()];
        b.tags = vec!["winter".into(), "one-pot".into()];

        let merged =
            merge_candidates(&[candidate("a", 0, 90.0, a), candidate("b", 1, 50.0, b)]).unwrap();
        assert_eq!(merged.recipe.ingredients, vec!["beef", "carrot"]);
        assert_eq!(merged.recipe.instructions, vec!["Simmer"]);
        assert_eq!(merged.recipe.tags, vec!["dinner", "winter", "one-pot"]);
    }

    #[test]
    fn test_confidence_tie_prefers_earlier_source() {
        let mut rich = Recipe::new("Rich");
        rich.ingredients = vec!["x".into()];
        rich.description = Some("Later but fuller".into());
        let mut sparse = Recipe::new("Sparse");
        sparse.description = Some("Earlier".into());

        // Completeness does not decide the base; the fuller record only fills gaps
        let merged = merge_candidates(&[
            candidate("rich", 1, 80.0, rich),
            candidate("sparse", 0, 80.0, sparse),
        ])
        .unwrap();
        assert_eq!(merged.recipe.title, "Sparse");
        assert_eq!(merged.recipe.description.as_deref(), Some("Earlier"));
        assert_eq!(merged.recipe.ingredients, vec!["x"]);

        let merged = merge_candidates(&[
            candidate("late", 1, 80.0, Recipe::new("Late")),
            candidate("early", 0, 80.0, Recipe::new("Early")),
        ])
        .unwrap();
        assert_eq!(merged.recipe.title, "Early");
    }

    #[test]
    fn test_empty_input() {
        assert!(merge_candidates(&[]).is_none());
    }
}
