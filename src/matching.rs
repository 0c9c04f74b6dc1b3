// 🔍 Name Matching - token overlap between free-text sale names and catalog names
//
// Problem solved:
// - "Chang" on the POS export → "Beer, Chang, classic, S bottle, 32cl" in the catalog
// - "Gin Nakin 40 750ml" → "Gin, Nakin, 40%, 750ml"
//
// Scoring is deliberately asymmetric: the denominator is the token count of
// the FIRST argument, so a short name fully contained in a long description
// scores 1.0. Ties keep the first candidate. Matching is greedy per target;
// the same candidate may be assigned to several targets.

use serde::{Deserialize, Serialize};

// ============================================================================
// MATCH RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Best candidate, or None when the top score is below the threshold
    #[serde(rename = "match")]
    pub matched: Option<String>,

    /// Top score seen, reported even when below the threshold
    pub score: f64,

    pub original_name: String,
}

/// One row of a batch match.
///
/// In the catalog → sales direction `catalog_name` is the catalog entry and
/// `sale_name` its best sale. The roles swap when the batch is run sales → catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMatch {
    pub catalog_name: String,
    pub sale_name: Option<String>,
    pub score: f64,
    pub matched: bool,
}

// ============================================================================
// TOKEN OVERLAP
// ============================================================================

/// Lowercase and split on non-alphanumeric boundaries.
/// Short tokens ("cl", "40", "1l") are kept.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

/// |tokens(a) ∩ tokens(b)| / |tokens(a)|, in [0, 1]. Zero when `a` has no tokens.
///
/// Example:
/// - score("Chang", "Beer, Chang, classic, S bottle, 32cl") = 1.0
/// - score("Beer, Chang, classic, S bottle, 32cl", "Chang") = 1/6
pub fn score(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    if tokens_a.is_empty() {
        return 0.0;
    }

    let tokens_b = tokenize(b);
    let match_count = tokens_a
        .iter()
        .filter(|token| tokens_b.contains(token))
        .count();

    match_count as f64 / tokens_a.len() as f64
}

/// Linear scan for the highest-scoring candidate.
///
/// Strict `>` keeps the first candidate on ties. A zero score is a real score:
/// with no candidate above zero the result simply carries no match.
pub fn find_best_match<S: AsRef<str>>(target: &str, candidates: &[S], threshold: f64) -> MatchResult {
    let mut best_match: Option<&str> = None;
    let mut highest_score = 0.0;

    for candidate in candidates {
        let candidate = candidate.as_ref();
        let candidate_score = score(target, candidate);

        if candidate_score > highest_score {
            highest_score = candidate_score;
            best_match = Some(candidate);
        }
    }

    let matched = if highest_score < threshold {
        None
    } else {
        best_match.map(|name| name.to_string())
    };

    MatchResult {
        matched,
        score: highest_score,
        original_name: target.to_string(),
    }
}

/// For each target, its independent best candidate. No global assignment is attempted.
pub fn match_items<S: AsRef<str>, T: AsRef<str>>(
    targets: &[S],
    candidates: &[T],
    threshold: f64,
) -> Vec<ItemMatch> {
    targets
        .iter()
        .map(|target| {
            let result = find_best_match(target.as_ref(), candidates, threshold);
            ItemMatch {
                catalog_name: target.as_ref().to_string(),
                matched: result.matched.is_some(),
                sale_name: result.matched,
                score: result.score,
            }
        })
        .collect()
}

// ============================================================================
// EDIT DISTANCE (auxiliary scorer)
// ============================================================================

/// Minimum number of single-character insertions, deletions or substitutions,
/// compared case-insensitively after trimming.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.trim().to_lowercase().chars().collect();
    let s2_chars: Vec<char> = s2.trim().to_lowercase().chars().collect();

    let len1 = s1_chars.len();
    let len2 = s2_chars.len();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    // Two rolling rows instead of the full matrix
    let mut previous: Vec<usize> = (0..=len2).collect();
    let mut current = vec![0; len2 + 1];

    for i in 1..=len1 {
        current[0] = i;
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };

            current[j] = std::cmp::min(
                std::cmp::min(
                    previous[j] + 1,     // deletion
                    current[j - 1] + 1,  // insertion
                ),
                previous[j - 1] + cost,  // substitution
            );
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[len2]
}

/// (len(longer) − distance) / len(longer); 1.0 for two empty strings.
pub fn edit_similarity(s1: &str, s2: &str) -> f64 {
    let len1 = s1.trim().chars().count();
    let len2 = s2.trim().chars().count();
    let longer = len1.max(len2);

    if longer == 0 {
        return 1.0;
    }

    let distance = levenshtein_distance(s1, s2);
    (longer - distance.min(longer)) as f64 / longer as f64
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: [&str; 4] = [
        "Beer, Chang, classic, S bottle, 32cl",
        "Beer, Singha, 33cl",
        "Beer, Leo, 33cl",
        "Wine, Chardonnay, 75cl",
    ];

    #[test]
    fn test_tokenize_keeps_short_tokens() {
        assert_eq!(
            tokenize("Vodka, Grey Goose, 40%, 1L"),
            vec!["vodka", "grey", "goose", "40", "1l"]
        );
        assert!(tokenize(" ,.- ").is_empty());
    }

    #[test]
    fn test_single_token_full_containment() {
        assert_eq!(score("Chang", "Beer, Chang, classic, S bottle, 32cl"), 1.0);
    }

    #[test]
    fn test_score_is_asymmetric() {
        let forward = score("Chang", "Beer, Chang, classic, S bottle, 32cl");
        let backward = score("Beer, Chang, classic, S bottle, 32cl", "Chang");

        assert_eq!(forward, 1.0);
        assert!((backward - 1.0 / 6.0).abs() < 1e-12);
        assert_ne!(forward, backward);
    }

    #[test]
    fn test_score_empty_target_is_zero() {
        assert_eq!(score("", "Beer, Leo"), 0.0);
        assert_eq!(score("%%", "Beer, Leo"), 0.0);
    }

    #[test]
    fn test_short_words_participate() {
        let catalog = [
            "Gin, Nakin, 40%, 750ml",
            "Vodka, Grey Goose, 40%, 1L",
            "Rum, Bacardi, 40%, 70cl",
        ];

        let result = find_best_match("Gin Nakin 40 750ml", &catalog, 0.3);
        assert_eq!(result.matched.as_deref(), Some("Gin, Nakin, 40%, 750ml"));
        assert_eq!(result.score, 1.0);

        let result = find_best_match("Rum Bacardi 40 70cl", &catalog, 0.3);
        assert_eq!(result.matched.as_deref(), Some("Rum, Bacardi, 40%, 70cl"));
    }

    #[test]
    fn test_find_best_match_picks_chang() {
        let result = find_best_match("Chang", &CATALOG, 0.3);

        assert_eq!(result.matched.as_deref(), Some("Beer, Chang, classic, S bottle, 32cl"));
        assert_eq!(result.score, 1.0);
        assert_eq!(result.original_name, "Chang");
    }

    #[test]
    fn test_threshold_gate() {
        // "beer" alone matches, 1 of 3 tokens
        let result = find_best_match("Beer Tiger Crystal", &CATALOG, 0.6);

        assert_eq!(result.matched, None);
        assert!((result.score - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_tie_keeps_first_candidate() {
        // "beer" scores 1.0 against all three beers; Chang comes first
        let result = find_best_match("Beer", &CATALOG, 0.5);
        assert_eq!(result.matched.as_deref(), Some("Beer, Chang, classic, S bottle, 32cl"));
    }

    #[test]
    fn test_no_overlap_yields_no_match_even_at_zero_threshold() {
        let result = find_best_match("Espresso", &CATALOG, 0.0);

        assert_eq!(result.matched, None);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_short_generic_name_matches_anything_containing_it() {
        // Existing behavior: a bare "1" fully overlaps any name with a "1" token
        let result = find_best_match("1", &["Vodka, 1, 1L", "Gin, 70cl"], 0.6);
        assert_eq!(result.matched.as_deref(), Some("Vodka, 1, 1L"));
    }

    #[test]
    fn test_match_items_allows_shared_candidates() {
        let catalog = ["Beer Chang", "Chang Beer large"];
        let sales = ["Chang", "Leo"];

        let matches = match_items(&catalog, &sales, 0.3);

        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.matched));
        assert!(matches.iter().all(|m| m.sale_name.as_deref() == Some("Chang")));
        assert_eq!(matches[0].score, 0.5);
        assert!((matches[1].score - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_match_items_unmatched_row() {
        let matches = match_items(&["Wine, Chardonnay, 75cl"], &["Chang"], 0.6);

        assert_eq!(matches[0].sale_name, None);
        assert!(!matches[0].matched);
        assert_eq!(matches[0].score, 0.0);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "ab"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("Singha", "SINGHA "), 0);
    }

    #[test]
    fn test_edit_similarity() {
        assert_eq!(edit_similarity("", ""), 1.0);
        assert_eq!(edit_similarity("chang", "chang"), 1.0);
        assert!((edit_similarity("singha", "singa") - 5.0 / 6.0).abs() < 1e-12);
        assert_eq!(edit_similarity("abc", "xyz"), 0.0);
    }
}
