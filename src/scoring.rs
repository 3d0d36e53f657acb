//! Preference-weighted scoring for product candidates.
//!
//! Pure functions: normalization of trust/sentiment/price signals,
//! weighted composition against [`PreferenceWeights`], market-average
//! computation, and deterministic ranking with main-product promotion.

use serde::{Deserialize, Serialize};

use crate::prefs::PreferenceWeights;
use crate::sources::{PriceOffer, ReviewSnippet};

/// A product under consideration for scoring: the main identified product
/// or a scouted alternative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub prices: Vec<PriceOffer>,
    #[serde(default)]
    pub reviews: Vec<ReviewSnippet>,
    /// Marks the originally identified product. At most one candidate per
    /// scoring batch carries this flag.
    #[serde(default)]
    pub is_main: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_text: Option<String>,
}

impl Candidate {
    /// First offer price in major units; 0.0 when no usable offer exists.
    pub fn primary_price(&self) -> f64 {
        self.prices.first().map(|p| p.price()).unwrap_or(0.0)
    }
}

/// Quantitative breakdown of a candidate's fit for the user.
///
/// Immutable once computed; re-analysis recomputes the whole breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// 0-10 trustworthiness from review analysis.
    pub trust_score: f64,
    /// -1 to 1 review sentiment.
    pub sentiment_score: f64,
    /// 0-1 normalized price competitiveness (higher is cheaper).
    pub price_score: f64,
    pub weighted_price: f64,
    pub weighted_quality: f64,
    pub weighted_trust: f64,
    /// 0-1 environmental friendliness, carried for display and verdicts.
    pub eco_score: f64,
    /// 0-100 final match score.
    pub total_score: f64,
}

/// Normalize a price against the market average.
///
/// Linear mapping: free = 1.0, market average = 0.5, double the average
/// or worse = 0.0. Non-positive inputs return the neutral 0.5.
pub fn price_score(price: f64, market_average: f64) -> f64 {
    if price <= 0.0 || market_average <= 0.0 {
        return 0.5;
    }

    let ratio = price / market_average;
    (1.0 - 0.5 * ratio).clamp(0.0, 1.0)
}

/// Compute the final weighted score for one candidate.
pub fn score(
    trust_score: f64,
    sentiment_score: f64,
    price_val: f64,
    market_avg: f64,
    weights: &PreferenceWeights,
    eco_score: f64,
) -> ScoreBreakdown {
    // Normalize inputs to 0-1.
    let norm_trust = trust_score / 10.0;
    let norm_sentiment = (sentiment_score + 1.0) / 2.0;
    let norm_price = price_score(price_val, market_avg);

    // Quality is defined by sentiment plus trust.
    let quality_component = (norm_sentiment * 0.7 + norm_trust * 0.3) * weights.quality;
    let price_component = norm_price * weights.price_sensitivity;
    let trust_component = norm_trust * weights.brand_reputation;

    let mut total_weight = weights.price_sensitivity + weights.quality + weights.brand_reputation;
    if total_weight == 0.0 {
        total_weight = 1.0;
    }

    let raw_score = (quality_component + price_component + trust_component) / total_weight;
    let total_score = (raw_score * 100.0 * 10.0).round() / 10.0;

    ScoreBreakdown {
        trust_score,
        sentiment_score,
        price_score: norm_price,
        weighted_price: price_component,
        weighted_quality: quality_component,
        weighted_trust: trust_component,
        eco_score,
        total_score,
    }
}

/// Arithmetic mean of all positive candidate prices in a batch.
///
/// Invalid and zero prices are excluded; an empty set yields 0.0, which
/// forces the neutral price score for every candidate.
pub fn market_average(candidates: &[Candidate]) -> f64 {
    let prices: Vec<f64> = candidates
        .iter()
        .map(|c| c.primary_price())
        .filter(|p| *p > 0.0)
        .collect();

    if prices.is_empty() {
        return 0.0;
    }

    prices.iter().sum::<f64>() / prices.len() as f64
}

/// A candidate with its computed breakdown and analysis annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub name: String,
    pub reason: String,
    pub score_details: ScoreBreakdown,
    #[serde(default)]
    pub sentiment_summary: String,
    #[serde(default)]
    pub eco_notes: String,
    pub is_main: bool,
    pub price_val: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_text: Option<String>,
}

/// Sort candidates by total score descending, stable on ties.
pub fn rank(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.score_details
            .total_score
            .partial_cmp(&a.score_details.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// The recommended pick for a ranked batch: the main product when present,
/// otherwise the highest-scoring candidate.
pub fn recommended(ranked: &[ScoredCandidate]) -> Option<&ScoredCandidate> {
    ranked.iter().find(|c| c.is_main).or_else(|| ranked.first())
}

/// Price verdict relative to the market average (±10% band).
pub fn price_verdict(price: f64, market_avg: f64) -> &'static str {
    if price <= 0.0 || market_avg <= 0.0 {
        return "Fair Price";
    }
    if price < market_avg * 0.9 {
        "Great Deal"
    } else if price > market_avg * 1.1 {
        "Premium Price"
    } else {
        "Fair Price"
    }
}
