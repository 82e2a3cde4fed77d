//! Score fusion and result ordering.

use std::cmp::Ordering;
use std::collections::HashSet;

use super::query::tokenize;
use super::results::SearchResult;

/// Bonus granted when every boost term appears in a chunk.
pub const BOOST_STEP: f32 = 0.05;

/// Map a cosine similarity onto `(relevance, distance)`, both in `[0, 1]`.
pub fn cosine_scores(cos: f32) -> (f32, f32) {
    let cos = cos.clamp(-1.0, 1.0);
    ((1.0 + cos) / 2.0, (1.0 - cos) / 2.0)
}

/// Weighted sum of the two paths; a missing component counts as zero.
pub fn fuse(semantic_weight: f32, text_weight: f32, semantic: Option<f32>, text: Option<f32>) -> f32 {
    let score = semantic_weight * semantic.unwrap_or(0.0) + text_weight * text.unwrap_or(0.0);
    score.clamp(0.0, 1.0)
}

/// `BOOST_STEP` scaled by the fraction of boost terms present in `content`.
pub fn boost_bonus(boost_terms: &[String], content: &str) -> f32 {
    if boost_terms.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = tokenize(content).into_iter().map(|t| t.to_lowercase()).collect();
    let hits = boost_terms.iter().filter(|t| tokens.contains(t.as_str())).count();
    BOOST_STEP * hits as f32 / boost_terms.len() as f32
}

/// Total order used for every result list.
///
/// Higher relevance first; among semantic matches the smaller vector
/// distance; exact matches before partial ones; shorter spans; then
/// discovery order and chunk id.
pub fn compare(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then_with(|| match (a.vector_distance, b.vector_distance) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| b.exact_match.cmp(&a.exact_match))
        .then_with(|| a.line_span().cmp(&b.line_span()))
        .then_with(|| a.found_at.cmp(&b.found_at))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Sort and number results `1..=N`.
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(compare);
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
}
