use crate::backend::{DocType, QueryHit};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Hard cap on remote attachments; positions run 1..=MAX_REMOTES.
pub const MAX_REMOTES: usize = 3;

const PHI: f64 = 1.618033988749895;

/// How much weight a remote's score carries, by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecaySchedule {
    /// phi^-position: 0.618, 0.382, 0.236
    #[default]
    Golden,
    /// 2^-position: 0.5, 0.25, 0.125
    Exponential,
    /// 1 - position/4: 0.75, 0.5, 0.25
    Linear,
}

impl DecaySchedule {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "golden" => Some(DecaySchedule::Golden),
            "exponential" => Some(DecaySchedule::Exponential),
            "linear" => Some(DecaySchedule::Linear),
            _ => None,
        }
    }

    /// Weight at a position; the local node is position 0 with weight 1.0.
    pub fn weight(&self, position: usize) -> f64 {
        if position == 0 {
            return 1.0;
        }
        match self {
            DecaySchedule::Golden => PHI.powi(-(position as i32)),
            DecaySchedule::Exponential => 0.5f64.powi(position as i32),
            DecaySchedule::Linear => (1.0 - position as f64 * 0.25).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    pub max_remotes: usize,
    pub per_remote_timeout: Duration,
    pub overall_budget: Duration,
    pub decay: DecaySchedule,
    pub allow: Vec<String>,
    pub read_only: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_remotes: MAX_REMOTES,
            per_remote_timeout: Duration::from_secs(5),
            overall_budget: Duration::from_secs(15),
            decay: DecaySchedule::Golden,
            allow: Vec::new(),
            read_only: true,
        }
    }
}

impl FederationConfig {
    pub fn validate(&self) -> Result<()> {
        validate_remote_count(self.max_remotes)?;
        if !self.read_only {
            return Err(Error::Config(
                "federation remotes must be opened read-only".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn validate_remote_count(count: usize) -> Result<()> {
    if count > MAX_REMOTES {
        return Err(Error::Config(format!(
            "at most {} federation remotes are supported, {} requested",
            MAX_REMOTES, count
        )));
    }
    Ok(())
}

/// One merged result: the local score plus each matching remote's weighted
/// score, ranked descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedHit {
    pub doc_id: String,
    pub sqlite_id: i64,
    pub doc_type: DocType,
    pub combined_score: f64,
    pub sources: Vec<String>,
    pub content: Option<String>,
}

/// Distances become scores so that weighting is additive: closer is larger,
/// always positive.
pub fn score_from_distance(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Merge local hits with per-position remote hits into combined scores.
pub fn merge_federated(
    local: Vec<QueryHit>,
    remotes: Vec<(usize, Vec<QueryHit>)>,
    decay: DecaySchedule,
    limit: usize,
) -> Vec<FederatedHit> {
    let mut merged: HashMap<String, FederatedHit> = HashMap::new();

    for hit in local {
        merged.insert(
            hit.doc_id.clone(),
            FederatedHit {
                doc_id: hit.doc_id,
                sqlite_id: hit.sqlite_id,
                doc_type: hit.doc_type,
                combined_score: score_from_distance(hit.distance),
                sources: vec!["local".to_string()],
                content: hit.content,
            },
        );
    }

    for (position, hits) in remotes {
        let weight = decay.weight(position);
        for hit in hits {
            let contribution = score_from_distance(hit.distance) * weight;
            let source = format!("remote{}", position);
            merged
                .entry(hit.doc_id.clone())
                .and_modify(|entry| {
                    entry.combined_score += contribution;
                    entry.sources.push(source.clone());
                })
                .or_insert(FederatedHit {
                    doc_id: hit.doc_id,
                    sqlite_id: hit.sqlite_id,
                    doc_type: hit.doc_type,
                    combined_score: contribution,
                    sources: vec![source],
                    content: hit.content,
                });
        }
    }

    let mut ranked: Vec<FederatedHit> = merged.into_values().collect();
    ranked.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn hit(doc_id: &str, distance: f64) -> QueryHit {
        QueryHit {
            doc_id: doc_id.to_string(),
            sqlite_id: 1,
            doc_type: DocType::Observation,
            distance,
            metadata: Value::Null,
            content: None,
        }
    }

    #[test]
    fn test_golden_weights() {
        let expected = [1.0, 0.618, 0.382, 0.236];
        for (position, want) in expected.iter().enumerate() {
            let got = DecaySchedule::Golden.weight(position);
            assert!(
                (got - want).abs() < 1e-3,
                "position {}: got {}, want {}",
                position,
                got,
                want
            );
        }
    }

    #[test]
    fn test_exponential_and_linear_weights() {
        assert_eq!(DecaySchedule::Exponential.weight(1), 0.5);
        assert_eq!(DecaySchedule::Exponential.weight(2), 0.25);
        assert_eq!(DecaySchedule::Exponential.weight(3), 0.125);
        assert_eq!(DecaySchedule::Linear.weight(1), 0.75);
        assert_eq!(DecaySchedule::Linear.weight(2), 0.5);
        assert_eq!(DecaySchedule::Linear.weight(3), 0.25);
    }

    #[test]
    fn test_remote_count_validation() {
        assert!(validate_remote_count(3).is_ok());
        assert!(validate_remote_count(4).is_err());

        let config = FederationConfig {
            max_remotes: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_sums_weighted_scores_for_matching_ids() {
        let local = vec![hit("obs_1_narrative", 0.0)];
        let remotes = vec![
            (1, vec![hit("obs_1_narrative", 0.0), hit("obs_2_text", 0.0)]),
            (2, vec![hit("obs_1_narrative", 0.0)]),
        ];

        let merged = merge_federated(local, remotes, DecaySchedule::Golden, 10);
        assert_eq!(merged[0].doc_id, "obs_1_narrative");
        // 1.0 local + 0.618 + 0.382, all at distance 0 (score 1.0)
        assert!((merged[0].combined_score - 2.0).abs() < 1e-3);
        assert_eq!(merged[0].sources.len(), 3);

        let lone = merged.iter().find(|h| h.doc_id == "obs_2_text").unwrap();
        assert!((lone.combined_score - 0.618).abs() < 1e-3);
    }

    #[test]
    fn test_merge_respects_limit_and_order() {
        let remotes = vec![(1, vec![hit("a", 0.0), hit("b", 1.0), hit("c", 2.0)])];
        let merged = merge_federated(Vec::new(), remotes, DecaySchedule::Exponential, 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].doc_id, "a");
        assert_eq!(merged[1].doc_id, "b");
    }
}
