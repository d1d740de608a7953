//! Recommendations derived from a score. Pure functions, no state.

use crate::models::{LeadInsights, MLLeadScore, RiskLevel, TimeToAction};
use chrono::Duration;

pub const IMMEDIATE_FOLLOW_UP: &str = "Prioritize for immediate follow-up";
pub const ENGAGE_WITHIN_48H: &str = "Engage within 48 hours";
pub const NURTURE_CAMPAIGN: &str = "Add to nurture campaign";

/// Conversion rate assumed when the model has no confidence at all.
const BASE_CONVERSION_RATE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Hot,
    Warm,
    Cold,
}

fn tier(score: f64) -> Tier {
    if score > 0.8 {
        Tier::Hot
    } else if score > 0.6 {
        Tier::Warm
    } else {
        Tier::Cold
    }
}

/// Risk of losing the lead.
pub fn risk_level(score: f64) -> RiskLevel {
    if score > 0.7 {
        RiskLevel::Low
    } else if score > 0.4 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Score pulled toward the base rate in proportion to missing confidence.
pub fn conversion_probability(score: f64, confidence: f64) -> f64 {
    let confidence = confidence.clamp(0.0, 1.0);
    (score * confidence + BASE_CONVERSION_RATE * (1.0 - confidence)).clamp(0.0, 1.0)
}

/// Notes stored on an `MLLeadScore` at scoring time.
pub fn score_summary(score: f64, confidence: f64, factors: &[String]) -> Vec<String> {
    let mut insights = vec![match tier(score) {
        Tier::Hot => "High conversion likelihood".to_string(),
        Tier::Warm => "Moderate conversion likelihood".to_string(),
        Tier::Cold => "Low conversion likelihood".to_string(),
    }];
    insights.extend(factors.iter().cloned());
    if confidence < 0.5 {
        insights.push("Low confidence prediction".to_string());
    }
    insights
}

fn time_to_action(score: &MLLeadScore) -> TimeToAction {
    let (urgent, recommended, hours) = match tier(score.score) {
        Tier::Hot => (true, "Contact within 4 hours", 4),
        Tier::Warm => (false, "Contact within 48 hours", 48),
        Tier::Cold => (false, "Follow up within 7 days", 24 * 7),
    };
    TimeToAction {
        urgent,
        recommended: recommended.to_string(),
        deadline: score.scored_at + Duration::hours(hours),
    }
}

/// Builds the insights for a current score.
///
/// The tier recommendation always comes first.
pub fn derive_insights(score: &MLLeadScore) -> LeadInsights {
    let mut recommended_actions = vec![match tier(score.score) {
        Tier::Hot => IMMEDIATE_FOLLOW_UP,
        Tier::Warm => ENGAGE_WITHIN_48H,
        Tier::Cold => NURTURE_CAMPAIGN,
    }
    .to_string()];

    if score.confidence < 0.5 {
        recommended_actions.push("Collect more lead data before committing resources".to_string());
    }
    if score.data_quality.is_some_and(|q| q < 0.6) {
        recommended_actions.push("Complete the lead profile in the CRM".to_string());
    }
    if let Some(ref comparison) = score.comparison {
        if comparison.delta <= -0.1 {
            recommended_actions.push("Review recent interactions: score dropped".to_string());
        }
    }

    let key_factors = if score.insights.is_empty() {
        vec![format!("Conversion score {:.2} from model {}", score.score, score.model_id)]
    } else {
        score.insights.clone()
    };

    LeadInsights {
        lead_id: score.lead_id,
        model_id: score.model_id.clone(),
        overall_score: score.score,
        conversion_probability: conversion_probability(score.score, score.confidence),
        risk_level: risk_level(score.score),
        recommended_actions,
        key_factors,
        time_to_action: time_to_action(score),
    }
}
