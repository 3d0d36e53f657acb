//! Preference weights: defaults, explicit/learned merging, and
//! behavior-learned weights derived from past categorical choices.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::Storage;

/// How much explicit preferences outweigh learned ones when merging.
pub const EXPLICIT_PRIORITY: f64 = 0.7;

/// Named preference weights, each conceptually in [0, 1].
///
/// Always fully populated: merges and learning never produce a sparse set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreferenceWeights {
    pub price_sensitivity: f64,
    pub quality: f64,
    pub eco_friendly: f64,
    pub brand_reputation: f64,
}

impl Default for PreferenceWeights {
    fn default() -> Self {
        Self {
            price_sensitivity: 0.5,
            quality: 0.5,
            eco_friendly: 0.3,
            brand_reputation: 0.4,
        }
    }
}

impl PreferenceWeights {
    /// Weight keys in canonical order.
    pub const KEYS: [&'static str; 4] = [
        "price_sensitivity",
        "quality",
        "eco_friendly",
        "brand_reputation",
    ];

    /// Look up a weight by key name.
    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "price_sensitivity" => Some(self.price_sensitivity),
            "quality" => Some(self.quality),
            "eco_friendly" => Some(self.eco_friendly),
            "brand_reputation" => Some(self.brand_reputation),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: f64) {
        match key {
            "price_sensitivity" => self.price_sensitivity = value,
            "quality" => self.quality = value,
            "eco_friendly" => self.eco_friendly = value,
            "brand_reputation" => self.brand_reputation = value,
            _ => {}
        }
    }

    /// Build from a possibly-sparse map, filling gaps with defaults.
    pub fn from_partial(partial: &HashMap<String, f64>) -> Self {
        let mut weights = Self::default();
        for key in Self::KEYS {
            if let Some(&v) = partial.get(key) {
                weights.set(key, v);
            }
        }
        weights
    }

    /// Export as a map keyed by weight name.
    pub fn to_map(&self) -> HashMap<String, f64> {
        Self::KEYS
            .iter()
            .map(|&k| (k.to_string(), self.get(k).unwrap_or_default()))
            .collect()
    }
}

/// Ideal weight vector implied by a single categorical choice.
fn choice_type_weights(preference_type: &str) -> HashMap<&'static str, f64> {
    match preference_type {
        "cheaper" => HashMap::from([("price_sensitivity", 1.0), ("quality", 0.3)]),
        "premium" => HashMap::from([
            ("price_sensitivity", 0.2),
            ("quality", 1.0),
            ("brand_reputation", 0.8),
        ]),
        "eco-friendly" => HashMap::from([("eco_friendly", 1.0), ("price_sensitivity", 0.4)]),
        "balanced" => HashMap::from([("price_sensitivity", 0.5), ("quality", 0.5)]),
        _ => HashMap::new(),
    }
}

/// Merge explicit preferences with learned ones.
///
/// For every default key:
/// `merged[k] = explicit.get(k, default[k]) * priority + learned.get(k, default[k]) * (1 - priority)`
pub fn merge_weights(
    explicit: &HashMap<String, f64>,
    learned: &HashMap<String, f64>,
    explicit_priority: f64,
) -> PreferenceWeights {
    let defaults = PreferenceWeights::default();
    let mut merged = PreferenceWeights::default();

    for key in PreferenceWeights::KEYS {
        let default_val = defaults.get(key).unwrap_or_default();
        let explicit_val = explicit.get(key).copied().unwrap_or(default_val);
        let learned_val = learned.get(key).copied().unwrap_or(default_val);
        merged.set(
            key,
            explicit_val * explicit_priority + learned_val * (1.0 - explicit_priority),
        );
    }

    merged
}

/// Blend learned weights from counted past choices.
///
/// Each choice category pulls the vector toward its ideal weights,
/// proportionally to its share of the user's history. No history returns
/// the default vector unchanged.
pub fn learn_weights(choice_counts: &[(String, i64)]) -> PreferenceWeights {
    let total: i64 = choice_counts.iter().map(|(_, c)| c.max(&0)).sum();
    if total == 0 {
        return PreferenceWeights::default();
    }

    let mut learned = PreferenceWeights::default();

    for (preference_type, count) in choice_counts {
        if *count <= 0 {
            continue;
        }
        let share = *count as f64 / total as f64;
        for (key, ideal) in choice_type_weights(preference_type) {
            let current = learned.get(key).unwrap_or_default();
            learned.set(key, current * (1.0 - share) + ideal * share);
        }
    }

    learned
}

/// Resolves the final weight vector for a user from storage plus
/// per-turn overrides.
#[derive(Clone)]
pub struct PreferenceResolver {
    storage: Arc<dyn Storage>,
}

impl PreferenceResolver {
    /// Create a resolver over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Resolve merged weights for a user.
    ///
    /// Explicit weights come from storage, overridden by any per-turn
    /// overrides (current session tweaks win), then blended with
    /// behavior-learned weights at [`EXPLICIT_PRIORITY`]. Storage failures
    /// degrade to the override/default path.
    pub async fn resolve(
        &self,
        user_id: &str,
        overrides: &HashMap<String, f64>,
    ) -> PreferenceWeights {
        let mut explicit = match self.storage.get_explicit_preferences(user_id).await {
            Ok(Some(saved)) => saved,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to load explicit preferences");
                HashMap::new()
            }
        };
        for (k, v) in overrides {
            explicit.insert(k.clone(), *v);
        }

        let learned = match self.storage.count_preference_choices(user_id).await {
            Ok(counts) => learn_weights(&counts),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to load preference history");
                PreferenceWeights::default()
            }
        };

        let merged = merge_weights(&explicit, &learned.to_map(), EXPLICIT_PRIORITY);
        debug!(user_id = %user_id, ?merged, "Resolved preference weights");
        merged
    }
}
