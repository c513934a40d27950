//! Similarity functions exposed to SQL.
//!
//! `trigram_similarity(a, b)` follows pg_trgm: each alphanumeric word is
//! lowercased and padded with two leading spaces and one trailing space, the
//! distinct three-character windows form the trigram set, and the score is
//! `|A ∩ B| / |A ∪ B|`.
//!
//! `cosine_similarity(a, b)` takes two little-endian f32 blobs and returns
//! NULL when either is missing or the dimensions differ.

use std::collections::HashSet;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

type Trigram = [char; 3];

fn trigrams(text: &str) -> HashSet<Trigram> {
    let mut set = HashSet::new();

    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  "
            .chars()
            .chain(word.chars().flat_map(char::to_lowercase))
            .chain(std::iter::once(' '))
            .collect();

        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }

    set
}

/// Trigram similarity in `[0, 1]`.
pub fn trigram_similarity(a: &str, b: &str) -> f32 {
    let left = trigrams(a);
    let right = trigrams(b);

    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let shared = left.intersection(&right).count();
    let union = left.len() + right.len() - shared;

    shared as f32 / union as f32
}

/// Cosine similarity, or `None` for mismatched or degenerate vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

/// Convert f32 vector to bytes (little-endian).
pub fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert little-endian bytes back to an f32 vector.
pub fn bytes_to_vec(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }

    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Register the similarity functions on a connection.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("trigram_similarity", 2, flags, |ctx| {
        let a: Option<String> = ctx.get(0)?;
        let b: Option<String> = ctx.get(1)?;

        Ok(match (a, b) {
            (Some(a), Some(b)) => f64::from(trigram_similarity(&a, &b)),
            _ => 0.0,
        })
    })?;

    conn.create_scalar_function("cosine_similarity", 2, flags, |ctx| {
        let a: Option<Vec<u8>> = ctx.get(0)?;
        let b: Option<Vec<u8>> = ctx.get(1)?;

        let score = match (a, b) {
            (Some(a), Some(b)) => match (bytes_to_vec(&a), bytes_to_vec(&b)) {
                (Some(a), Some(b)) => cosine_similarity(&a, &b).map(f64::from),
                _ => None,
            },
            _ => None,
        };

        Ok(score)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigram_identical_and_disjoint() {
        assert!((trigram_similarity("bilge pump", "Bilge Pump") - 1.0).abs() < 1e-6);
        assert_eq!(trigram_similarity("abc", "xyz"), 0.0);
        assert_eq!(trigram_similarity("", "abc"), 0.0);
    }

    #[test]
    fn test_trigram_matches_pg_trgm() {
        // pg_trgm: similarity('word', 'two words') = 4 / 11
        let score = trigram_similarity("word", "two words");
        assert!((score - 4.0 / 11.0).abs() < 1e-6, "got {}", score);
    }

    #[test]
    fn test_trigram_tolerates_typos() {
        let close = trigram_similarity("generator", "generater");
        let far = trigram_similarity("generator", "anchor windlass");
        assert!(close > 0.3);
        assert!(close > far);
    }

    #[test]
    fn test_cosine() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_sql_functions() {
        let conn = Connection::open_in_memory().unwrap();
        register_functions(&conn).unwrap();

        let score: f64 = conn
            .query_row("SELECT trigram_similarity('pump', 'pump')", [], |r| r.get(0))
            .unwrap();
        assert!((score - 1.0).abs() < 1e-6);

        let a = vec_to_bytes(&[0.6, 0.8]);
        let b = vec_to_bytes(&[0.6, 0.8]);
        let cos: Option<f64> = conn
            .query_row("SELECT cosine_similarity(?1, ?2)", [&a, &b], |r| r.get(0))
            .unwrap();
        assert!((cos.unwrap() - 1.0).abs() < 1e-6);

        let short = vec_to_bytes(&[1.0]);
        let mismatch: Option<f64> = conn
            .query_row("SELECT cosine_similarity(?1, ?2)", [&a, &short], |r| r.get(0))
            .unwrap();
        assert!(mismatch.is_none());
    }
}
