//! Similarity scoring seam for hybrid vector + graph queries

use nodus_core::{Result, Value};

/// Scores how similar a stored property value is to a query value
///
/// Registered on the driver and consulted only by `HybridExpand`. A score
/// of `None` means the pair cannot be compared and the candidate is
/// dropped.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, stored: &Value, query: &Value) -> Result<Option<f64>>;
}

/// Cosine similarity between two numeric lists of equal length
#[derive(Debug, Default, Clone, Copy)]
pub struct CosineScorer;

impl SimilarityScorer for CosineScorer {
    fn score(&self, stored: &Value, query: &Value) -> Result<Option<f64>> {
        let (Some(a), Some(b)) = (numeric_list(stored), numeric_list(query)) else {
            return Ok(None);
        };
        if a.len() != b.len() || a.is_empty() {
            return Ok(None);
        }

        let dot: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(None);
        }
        Ok(Some(dot / (norm_a * norm_b)))
    }
}

fn numeric_list(value: &Value) -> Option<Vec<f64>> {
    value.as_list()?.iter().map(Value::as_float).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(items: &[f64]) -> Value {
        Value::List(items.iter().copied().map(Value::Float).collect())
    }

    #[test]
    fn test_cosine_scores() {
        let scorer = CosineScorer;
        let same = scorer.score(&vector(&[1.0, 0.0]), &vector(&[2.0, 0.0])).unwrap();
        assert_eq!(same, Some(1.0));

        let orthogonal = scorer.score(&vector(&[1.0, 0.0]), &vector(&[0.0, 1.0])).unwrap();
        assert_eq!(orthogonal, Some(0.0));
    }

    #[test]
    fn test_incomparable_values() {
        let scorer = CosineScorer;
        assert_eq!(
            scorer.score(&vector(&[1.0]), &vector(&[1.0, 2.0])).unwrap(),
            None
        );
        assert_eq!(
            scorer.score(&Value::String("x".into()), &vector(&[1.0])).unwrap(),
            None
        );
    }
}
