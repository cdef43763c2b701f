//! Normalized recipe records and completeness scoring.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// A recipe as normalized from any source.
///
/// Every field except `title` may be absent; sources fill what they can.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Recipe {
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ingredients: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub servings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prep_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cook_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_minutes: Option<u32>,
    /// Nutrient name to amount, e.g. `"calories" => "240 kcal"`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub nutrition: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "url")]
    pub source_url: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => Some(s),
        Some(Raw::Int(n)) => Some(n.to_string()),
        Some(Raw::Float(n)) => Some(n.to_string()),
        None => None,
    })
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl Recipe {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }

    pub fn has_description(&self) -> bool {
        has_text(&self.description)
    }

    pub fn has_image(&self) -> bool {
        has_text(&self.image)
    }

    pub fn has_servings(&self) -> bool {
        has_text(&self.servings)
    }

    pub fn has_cuisine(&self) -> bool {
        has_text(&self.cuisine)
    }

    pub fn has_timing(&self) -> bool {
        self.prep_minutes.is_some() || self.cook_minutes.is_some() || self.total_minutes.is_some()
    }

    /// Completeness score, 0 to 100.
    ///
    /// | field | weight |
    /// |---|---|
    /// | title | 10 |
    /// | ingredients | 25 |
    /// | instructions | 25 |
    /// | image, servings, any timing, description, tags, cuisine | 5 each |
    /// | nutrition | 10 |
    pub fn completeness(&self) -> u8 {
        let mut score = 0u8;
        if self.has_title() {
            score += 10;
        }
        if !self.ingredients.is_empty() {
            score += 25;
        }
        if !self.instructions.is_empty() {
            score += 25;
        }
        if self.has_image() {
            score += 5;
        }
        if self.has_servings() {
            score += 5;
        }
        if self.has_timing() {
            score += 5;
        }
        if self.has_description() {
            score += 5;
        }
        if !self.nutrition.is_empty() {
            score += 10;
        }
        if !self.tags.is_empty() {
            score += 5;
        }
        if self.has_cuisine() {
            score += 5;
        }
        score
    }
}

/// A recipe offered by one source for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCandidate {
    pub recipe: Recipe,
    pub source_id: String,
    /// Trust in the source, 0 to 100.
    pub confidence: f64,
    /// Field coverage of `recipe`, 0 to 100.
    pub completeness: u8,
    /// Title similarity to the query, 0.0 to 1.0.
    pub match_score: f64,
    /// Position of the source in the cascade; lower was consulted first.
    pub source_rank: usize,
}

impl SourceCandidate {
    pub fn new(
        recipe: Recipe,
        source_id: impl Into<String>,
        confidence: f64,
        match_score: f64,
        source_rank: usize,
    ) -> Self {
        let completeness = recipe.completeness();
        Self {
            recipe,
            source_id: source_id.into(),
            confidence: confidence.clamp(0.0, 100.0),
            completeness,
            match_score,
            source_rank,
        }
    }
}
