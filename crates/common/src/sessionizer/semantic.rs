//! Semantic refinement of large sessions
//!
//! For sessions above a size threshold, cosine similarity between
//! consecutive message embeddings finds topic boundaries: breakpoints
//! fall where similarity drops into the bottom p-th percentile, and a
//! split is taken only when both resulting sub-sessions keep the minimum
//! message count. Deterministic given the message list, embeddings and
//! percentile.

use super::SessionDraft;

/// Refinement tuning.
#[derive(Debug, Clone)]
pub struct RefineParams {
    /// Session size that triggers refinement
    pub threshold_messages: usize,
    /// Bottom percentile of similarities that become breakpoints
    pub percentile: f64,
    /// Minimum messages per resulting sub-session
    pub min_messages: usize,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            threshold_messages: 20,
            percentile: 5.0,
            min_messages: 2,
        }
    }
}

impl RefineParams {
    pub fn from_config(config: &crate::config::SessionConfig) -> Option<Self> {
        if !config.semantic_refine_enabled {
            return None;
        }
        Some(Self {
            threshold_messages: config.semantic_refine_threshold_messages,
            percentile: config.semantic_percentile,
            min_messages: config.min_messages,
        })
    }
}

/// Cosine similarity between two vectors. Zero for degenerate input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Similarity between each pair of consecutive embeddings: N inputs
/// produce N-1 scores.
pub fn consecutive_similarities(embeddings: &[Vec<f32>]) -> Vec<f64> {
    if embeddings.len() < 2 {
        return Vec::new();
    }
    embeddings
        .windows(2)
        .map(|pair| cosine_similarity(&pair[0], &pair[1]))
        .collect()
}

/// Linear-interpolated percentile of a sample, `p` in [0, 100].
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Indices to split AFTER: position i+1 starts a new sub-session when
/// similarity i falls below the bottom-percentile cutoff. Too few scores
/// produce no breakpoints.
pub fn find_breakpoints(similarities: &[f64], bottom_percentile: f64) -> Vec<usize> {
    if similarities.len() < 3 {
        return Vec::new();
    }
    let cutoff = percentile(similarities, bottom_percentile);

    similarities
        .iter()
        .enumerate()
        .filter(|(_, sim)| **sim < cutoff)
        .map(|(i, _)| i + 1)
        .collect()
}

/// Split a large session at semantic breakpoints. `embeddings[i]` must
/// correspond to `draft.messages[i]`. Breakpoints that would create a
/// sub-session below the minimum size are skipped.
pub fn refine(draft: SessionDraft, embeddings: &[Vec<f32>], params: &RefineParams) -> Vec<SessionDraft> {
    if draft.len() < params.threshold_messages || embeddings.len() != draft.len() {
        return vec![draft];
    }

    let similarities = consecutive_similarities(embeddings);
    let breakpoints = find_breakpoints(&similarities, params.percentile);
    if breakpoints.is_empty() {
        return vec![draft];
    }

    let total = draft.len();
    let mut boundaries: Vec<usize> = Vec::new();
    let mut last = 0usize;
    for bp in breakpoints {
        if bp - last >= params.min_messages && total - bp >= params.min_messages {
            boundaries.push(bp);
            last = bp;
        }
    }
    if boundaries.is_empty() {
        return vec![draft];
    }

    let mut result = Vec::with_capacity(boundaries.len() + 1);
    let mut start = 0usize;
    for bp in boundaries.into_iter().chain(std::iter::once(total)) {
        let piece = SessionDraft {
            channel_id: draft.channel_id,
            messages: draft.messages[start..bp].to_vec(),
        };
        result.push(piece);
        start = bp;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessionizer::SessionMessage;
    use chrono::{TimeZone, Utc};

    fn draft_of(n: usize) -> SessionDraft {
        let messages = (0..n)
            .map(|i| SessionMessage {
                id: i as i64 + 1,
                channel_id: 1,
                author_id: 1,
                content: format!("message {}", i),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap().into(),
                reply_to_id: None,
            })
            .collect();
        SessionDraft {
            channel_id: 1,
            messages,
        }
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_consecutive_similarities_count() {
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let sims = consecutive_similarities(&embeddings);
        assert_eq!(sims.len(), 2);
        assert!(sims[0] > 0.99);
        assert!(sims[1] < 0.01);
    }

    #[test]
    fn test_percentile_interpolation() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 0.0) - 1.0).abs() < 1e-9);
        assert!((percentile(&values, 100.0) - 4.0).abs() < 1e-9);
        assert!((percentile(&values, 50.0) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_refine_below_threshold_is_identity() {
        let draft = draft_of(5);
        let embeddings: Vec<Vec<f32>> = (0..5).map(|_| vec![1.0, 0.0]).collect();
        let result = refine(draft.clone(), &embeddings, &RefineParams::default());
        assert_eq!(result, vec![draft]);
    }

    #[test]
    fn test_refine_splits_at_similarity_drop() {
        let n = 24;
        let draft = draft_of(n);
        // Two clusters along orthogonal axes; the boundary pair has the
        // lowest consecutive similarity.
        let embeddings: Vec<Vec<f32>> = (0..n)
            .map(|i| if i < 12 { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect();

        let params = RefineParams {
            threshold_messages: 20,
            percentile: 5.0,
            min_messages: 2,
        };
        let result = refine(draft, &embeddings, &params);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].len(), 12);
        assert_eq!(result[1].len(), 12);
    }

    #[test]
    fn test_refine_respects_min_size() {
        let n = 22;
        let draft = draft_of(n);
        // Drop right at the start would create a 1-message sub-session.
        let embeddings: Vec<Vec<f32>> = (0..n)
            .map(|i| if i < 1 { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect();

        let params = RefineParams {
            threshold_messages: 20,
            percentile: 5.0,
            min_messages: 2,
        };
        let result = refine(draft.clone(), &embeddings, &params);
        assert_eq!(result.len(), 1, "a 1-message split must be skipped");
        assert_eq!(result[0].len(), n);
    }

    #[test]
    fn test_refine_deterministic() {
        let n = 24;
        let draft = draft_of(n);
        let embeddings: Vec<Vec<f32>> = (0..n)
            .map(|i| if i % 7 == 0 { vec![0.3, 0.9] } else { vec![0.9, 0.1] })
            .collect();
        let params = RefineParams::default();

        let a = refine(draft.clone(), &embeddings, &params);
        let b = refine(draft, &embeddings, &params);
        assert_eq!(a, b);
    }
}
