//! Pure scoring functions: risk score, attribution score, and risk band.
//!
//! Every function here is referentially transparent - same input map,
//! same output, no I/O, no clock reads beyond what's already embedded in
//! the `NormalizedResult.last_seen` timestamps passed in.

use std::collections::HashSet;

use chrono::{Duration, Utc};

use crate::models::{EnrichmentMap, RiskBand, Score, Verdict};

/// +15 per malicious provider, +5 per suspicious provider, +10 if three or
/// more providers agree (malicious or suspicious), +10 once if any result
/// was seen in the last 7 days, +10 once if any actor/family is present.
/// Capped at 100.
pub fn calculate_risk_score(results: &EnrichmentMap) -> i32 {
    let mut score: i32 = 0;
    let mut provider_agreement = 0;

    for result in results.values() {
        match result.verdict {
            Verdict::Malicious => {
                score += 15;
                provider_agreement += 1;
            }
            Verdict::Suspicious => {
                score += 5;
                provider_agreement += 1;
            }
            _ => {}
        }
    }

    if provider_agreement >= 3 {
        score += 10;
    }

    let recent_cutoff = Utc::now() - Duration::days(7);
    if results.values().any(|r| r.last_seen.is_some_and(|ts| ts > recent_cutoff)) {
        score += 10;
    }

    if results.values().any(|r| r.actor.is_some() || r.family.is_some()) {
        score += 10;
    }

    score.min(100)
}

/// +40 if any actor is present, +30 if any family is present, +20 more if
/// more than one distinct actor or more than one distinct family is seen
/// across providers. Capped at 100.
pub fn calculate_attribution_score(results: &EnrichmentMap) -> i32 {
    let mut actors: HashSet<&str> = HashSet::new();
    let mut families: HashSet<&str> = HashSet::new();

    for result in results.values() {
        if let Some(actor) = &result.actor {
            actors.insert(actor.as_str());
        }
        if let Some(family) = &result.family {
            families.insert(family.as_str());
        }
    }

    let mut score: i32 = 0;
    if !actors.is_empty() {
        score += 40;
    }
    if !families.is_empty() {
        score += 30;
    }
    if actors.len() > 1 || families.len() > 1 {
        score += 20;
    }

    score.min(100)
}

/// Score a full enrichment map in one call.
pub fn score(results: &EnrichmentMap) -> Score {
    let risk_score = calculate_risk_score(results);
    let attribution_score = calculate_attribution_score(results);
    Score {
        risk_score,
        attribution_score,
        risk_band: RiskBand::from_score(risk_score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedResult;

    fn result(verdict: Verdict) -> NormalizedResult {
        NormalizedResult {
            verdict,
            ..Default::default()
        }
    }

    fn with_actor(mut r: NormalizedResult, actor: &str) -> NormalizedResult {
        r.actor = Some(actor.to_string());
        r
    }

    fn with_family(mut r: NormalizedResult, family: &str) -> NormalizedResult {
        r.family = Some(family.to_string());
        r
    }

    fn with_last_seen(mut r: NormalizedResult, when: chrono::DateTime<Utc>) -> NormalizedResult {
        r.last_seen = Some(when);
        r
    }

    #[test]
    fn all_unknown_scores_zero() {
        let map: EnrichmentMap = [("vt".to_string(), result(Verdict::Unknown))].into_iter().collect();
        assert_eq!(calculate_risk_score(&map), 0);
        assert_eq!(calculate_attribution_score(&map), 0);
        assert_eq!(RiskBand::from_score(0), RiskBand::Low);
    }

    #[test]
    fn single_malicious_provider_scores_fifteen() {
        let map: EnrichmentMap = [("vt".to_string(), result(Verdict::Malicious))].into_iter().collect();
        assert_eq!(calculate_risk_score(&map), 15);
        assert_eq!(RiskBand::from_score(15), RiskBand::Low);
    }

    #[test]
    fn three_agreeing_providers_add_agreement_bonus() {
        let map: EnrichmentMap = [
            ("vt".to_string(), result(Verdict::Malicious)),
            ("crowdstrike".to_string(), result(Verdict::Malicious)),
            ("flashpoint".to_string(), result(Verdict::Suspicious)),
        ]
        .into_iter()
        .collect();
        // 15 + 15 + 5 + 10 agreement = 45
        assert_eq!(calculate_risk_score(&map), 45);
        assert_eq!(RiskBand::from_score(45), RiskBand::Medium);
    }

    #[test]
    fn recent_sighting_adds_ten_once_not_per_provider() {
        let now = Utc::now();
        let map: EnrichmentMap = [
            ("vt".to_string(), with_last_seen(result(Verdict::Malicious), now)),
            ("crowdstrike".to_string(), with_last_seen(result(Verdict::Malicious), now)),
        ]
        .into_iter()
        .collect();
        // 15 + 15 + 10 (recent, once) = 40; agreement count is 2, below threshold
        assert_eq!(calculate_risk_score(&map), 40);
    }

    #[test]
    fn actor_or_family_present_scores_high_attribution() {
        let map: EnrichmentMap = [(
            "vt".to_string(),
            with_family(with_actor(result(Verdict::Malicious), "FIN7"), "Carbanak"),
        )]
        .into_iter()
        .collect();
        assert_eq!(calculate_attribution_score(&map), 70);
    }

    #[test]
    fn multiple_distinct_actors_add_agreement_bonus() {
        let map: EnrichmentMap = [
            ("vt".to_string(), with_actor(result(Verdict::Malicious), "FIN7")),
            ("crowdstrike".to_string(), with_actor(result(Verdict::Malicious), "APT28")),
        ]
        .into_iter()
        .collect();
        assert_eq!(calculate_attribution_score(&map), 60);
    }

    #[test]
    fn risk_score_caps_at_one_hundred() {
        let map: EnrichmentMap = [
            ("a".to_string(), result(Verdict::Malicious)),
            ("b".to_string(), result(Verdict::Malicious)),
            ("c".to_string(), result(Verdict::Malicious)),
            ("d".to_string(), result(Verdict::Malicious)),
            ("e".to_string(), result(Verdict::Malicious)),
            ("f".to_string(), result(Verdict::Malicious)),
            ("g".to_string(), with_family(with_actor(result(Verdict::Malicious), "x"), "y")),
        ]
        .into_iter()
        .collect();
        assert_eq!(calculate_risk_score(&map), 100);
        assert_eq!(RiskBand::from_score(100), RiskBand::Critical);
    }

    #[test]
    fn risk_band_boundaries() {
        assert_eq!(RiskBand::from_score(24), RiskBand::Low);
        assert_eq!(RiskBand::from_score(25), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(49), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(50), RiskBand::High);
        assert_eq!(RiskBand::from_score(74), RiskBand::High);
        assert_eq!(RiskBand::from_score(75), RiskBand::Critical);
    }
}
