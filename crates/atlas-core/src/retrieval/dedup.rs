//! Near-duplicate chunk removal.
//!
//! Greedy pass over the hits in score order: a candidate whose cosine
//! similarity to any kept chunk exceeds the threshold is dropped and
//! recorded in the duplicate map. In repo-aware mode the sort key is
//! `similarity x repo-type priority`, and a near-duplicate pair that
//! crosses repo types keeps the non-reference side.

use std::collections::HashMap;

use crate::embedder::cosine_similarity;
use crate::types::{ChunkHit, RepoType};

/// Result of one deduplication pass.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Survivors, in ranked order.
    pub kept: Vec<ChunkHit>,
    /// `dropped chunk_id -> kept chunk_id`.
    pub duplicate_map: HashMap<String, String>,
    /// Number of dropped chunks.
    pub duplicates_removed: usize,
}

/// Deduplicate `hits` at `threshold`. `repo_aware` enables the priority
/// mode used when results span multiple repositories.
pub fn dedup(hits: Vec<ChunkHit>, threshold: f32, repo_aware: bool) -> DedupOutcome {
    let mut ranked = hits;
    ranked.sort_by(|a, b| {
        let score = |hit: &ChunkHit| {
            if repo_aware {
                hit.similarity * priority_of(hit.repo_type)
            } else {
                hit.similarity
            }
        };
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
    });

    let mut outcome = DedupOutcome::default();

    'candidates: for candidate in ranked {
        for kept in &mut outcome.kept {
            let similarity =
                cosine_similarity(&candidate.chunk.embedding, &kept.chunk.embedding);
            if similarity > threshold {
                let kept_is_reference =
                    kept.repo_type.map(|t| t.is_reference_material()).unwrap_or(false);
                let candidate_is_reference = candidate
                    .repo_type
                    .map(|t| t.is_reference_material())
                    .unwrap_or(false);

                if repo_aware && kept_is_reference && !candidate_is_reference {
                    // The duplicate crosses repo types: the non-reference
                    // result replaces the reference result.
                    let dropped_id = kept.chunk.chunk_id.clone();
                    outcome
                        .duplicate_map
                        .insert(dropped_id, candidate.chunk.chunk_id.clone());
                    outcome.duplicates_removed += 1;
                    *kept = candidate;
                } else {
                    outcome
                        .duplicate_map
                        .insert(candidate.chunk.chunk_id.clone(), kept.chunk.chunk_id.clone());
                    outcome.duplicates_removed += 1;
                }
                continue 'candidates;
            }
        }
        outcome.kept.push(candidate);
    }

    outcome
}

fn priority_of(repo_type: Option<RepoType>) -> f32 {
    repo_type.map_or(1.0, |t| t.dedup_priority())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkKind, CodeChunk, Language, ProjectRefs};

    fn hit(id: &str, embedding: Vec<f32>, similarity: f32, repo_type: Option<RepoType>) -> ChunkHit {
        ChunkHit {
            chunk: CodeChunk {
                chunk_id: id.to_string(),
                repo_path: "/repo".into(),
                file_path: format!("src/{id}.ts"),
                kind: ChunkKind::Function,
                start_line: 1,
                end_line: 10,
                content: "function f() {}".into(),
                language: Language::TypeScript,
                token_count: 10,
                embedding,
                metadata: serde_json::json!({}),
                refs: ProjectRefs::default(),
            },
            similarity,
            repo_type,
        }
    }

    /// Two unit vectors at a known cosine.
    fn near_pair(cosine: f32) -> (Vec<f32>, Vec<f32>) {
        let a = vec![1.0, 0.0];
        let angle = cosine.acos();
        let b = vec![angle.cos(), angle.sin()];
        (a, b)
    }

    #[test]
    fn drops_near_duplicates_above_threshold() {
        let (a, b) = near_pair(0.95);
        let hits = vec![
            hit("keep", a, 0.9, None),
            hit("drop", b, 0.8, None),
            hit("other", vec![0.0, 1.0], 0.7, None),
        ];
        let outcome = dedup(hits, 0.92, false);

        assert_eq!(outcome.kept.len(), 2);
        assert_eq!(outcome.duplicates_removed, 1);
        assert_eq!(outcome.duplicate_map.get("drop").map(String::as_str), Some("keep"));
    }

    #[test]
    fn kept_pairs_stay_under_threshold() {
        let hits = vec![
            hit("a", vec![1.0, 0.0], 0.9, None),
            hit("b", vec![0.93, 0.367], 0.85, None), // cos ~0.93 with a
            hit("c", vec![0.0, 1.0], 0.8, None),
        ];
        let outcome = dedup(hits, 0.92, false);

        for (i, left) in outcome.kept.iter().enumerate() {
            for right in &outcome.kept[i + 1..] {
                let sim = cosine_similarity(&left.chunk.embedding, &right.chunk.embedding);
                assert!(sim <= 0.92 + 1e-6, "kept pair above threshold: {sim}");
            }
        }
    }

    #[test]
    fn reference_duplicate_loses_to_first_party() {
        // Same raw similarity; identical embeddings (cosine 1.0).
        let hits = vec![
            hit("ref", vec![1.0, 0.0], 0.80, Some(RepoType::Reference)),
            hit("mono", vec![1.0, 0.0], 0.80, Some(RepoType::Monolithic)),
        ];
        let outcome = dedup(hits, 0.92, true);

        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].chunk.chunk_id, "mono");
        assert_eq!(outcome.duplicates_removed, 1);
        assert_eq!(outcome.duplicate_map.get("ref").map(String::as_str), Some("mono"));
    }

    #[test]
    fn reference_kept_entry_is_replaced_by_later_first_party() {
        // The reference hit ranks first on raw similarity in repo-aware
        // mode only when its weighted score still wins; force the replace
        // path with a much higher reference similarity.
        let hits = vec![
            hit("ref", vec![1.0, 0.0], 0.99, Some(RepoType::Reference)),
            hit("mono", vec![1.0, 0.0], 0.50, Some(RepoType::Monolithic)),
        ];
        // Weighted: ref = 0.594, mono = 0.50 -- ref is kept first, then
        // the first-party duplicate replaces it.
        let outcome = dedup(hits, 0.92, true);
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].chunk.chunk_id, "mono");
        assert_eq!(outcome.duplicate_map.get("ref").map(String::as_str), Some("mono"));
    }

    #[test]
    fn empty_embeddings_never_match() {
        let hits = vec![
            hit("a", Vec::new(), 0.9, None),
            hit("b", Vec::new(), 0.8, None),
        ];
        let outcome = dedup(hits, 0.92, false);
        assert_eq!(outcome.kept.len(), 2);
        assert_eq!(outcome.duplicates_removed, 0);
    }
}
