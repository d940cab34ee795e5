//! Word Selector: decides which frequent words a paragraph should switch.
//!
//! Coverage is modelled with rank-based (harmonic) weighting: the word at
//! rank *i* contributes weight 1/*i*. The switch count for a percentage is
//! the shortest prefix of the ranked list whose share of the total weight
//! reaches that percentage.

use crate::error::{CodeSwitchError, Result};
use crate::frequency::FrequencyTable;
use crate::language::Language;
use std::collections::{BTreeSet, HashSet};

/// Requested language pair and switch percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchSpec {
    pub source: Language,
    pub target: Language,
    pub percentage: f64,
}

impl SwitchSpec {
    pub fn new(source: Language, target: Language, percentage: f64) -> Result<Self> {
        if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
            return Err(CodeSwitchError::Validation(format!(
                "percentage must be between 0 and 100, got {}",
                percentage
            )));
        }
        if source == target {
            return Err(CodeSwitchError::Validation(format!(
                "source and target language must differ (both '{}')",
                source
            )));
        }
        Ok(Self {
            source,
            target,
            percentage,
        })
    }
}

/// Number of top-ranked words that must be switched to cover `percentage`
/// of the harmonic weight of `total_ranked_words` words.
///
/// Monotone non-decreasing in `percentage`; 0 (or less) gives 0 and 100
/// (or more) gives `total_ranked_words`.
pub fn compute_switch_count(total_ranked_words: usize, percentage: f64) -> usize {
    if total_ranked_words == 0 || percentage.is_nan() || percentage <= 0.0 {
        return 0;
    }
    if percentage >= 100.0 {
        return total_ranked_words;
    }

    let target = percentage / 100.0;
    let total: f64 = (1..=total_ranked_words).map(|rank| 1.0 / rank as f64).sum();

    let mut cumulative = 0.0;
    for rank in 1..=total_ranked_words {
        cumulative += 1.0 / rank as f64;
        if cumulative / total >= target {
            return rank;
        }
    }

    total_ranked_words
}

/// Distinct lower-cased whitespace tokens of `paragraph` that are among the
/// top `switch_count` words of `table`.
pub fn select_candidates(
    paragraph: &str,
    switch_count: usize,
    table: &FrequencyTable,
) -> BTreeSet<String> {
    if switch_count == 0 {
        return BTreeSet::new();
    }

    let frequent: HashSet<&str> = table.top(switch_count).collect();

    paragraph
        .to_lowercase()
        .split_whitespace()
        .filter(|token| frequent.contains(token))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::FrequencyEntry;
    use proptest::prelude::*;

    fn table(words: &[&str]) -> FrequencyTable {
        FrequencyTable::new(
            "en",
            words
                .iter()
                .map(|w| FrequencyEntry {
                    word: w.to_string(),
                    count: 1,
                })
                .collect(),
        )
    }

    // ==================== compute_switch_count Tests ====================

    #[test]
    fn test_zero_percent_is_zero() {
        assert_eq!(compute_switch_count(10, 0.0), 0);
        assert_eq!(compute_switch_count(50_000, 0.0), 0);
    }

    #[test]
    fn test_hundred_percent_is_everything() {
        assert_eq!(compute_switch_count(10, 100.0), 10);
        assert_eq!(compute_switch_count(10, 150.0), 10);
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(compute_switch_count(0, 50.0), 0);
        assert_eq!(compute_switch_count(0, 100.0), 0);
    }

    #[test]
    fn test_known_harmonic_thresholds() {
        // H(10) ≈ 2.929; H(1)/H(10) ≈ 34.1%, H(2)/H(10) ≈ 51.2%,
        // H(4)/H(10) ≈ 71.1%, H(5)/H(10) ≈ 78.0%
        assert_eq!(compute_switch_count(10, 30.0), 1);
        assert_eq!(compute_switch_count(10, 34.0), 1);
        assert_eq!(compute_switch_count(10, 50.0), 2);
        assert_eq!(compute_switch_count(10, 75.0), 5);
        assert_eq!(compute_switch_count(10, 99.9), 10);
    }

    #[test]
    fn test_tiny_percentage_still_selects_top_word() {
        assert_eq!(compute_switch_count(10, 0.001), 1);
    }

    #[test]
    fn test_nan_is_zero() {
        assert_eq!(compute_switch_count(10, f64::NAN), 0);
    }

    proptest! {
        #[test]
        fn prop_monotone_in_percentage(
            n in 1usize..2000,
            a in 0.0f64..=100.0,
            b in 0.0f64..=100.0,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(compute_switch_count(n, lo) <= compute_switch_count(n, hi));
        }

        #[test]
        fn prop_count_is_bounded(n in 0usize..2000, p in 0.0f64..=100.0) {
            prop_assert!(compute_switch_count(n, p) <= n);
        }

        #[test]
        fn prop_selection_is_deterministic(text in "[a-e ]{0,60}", k in 0usize..6) {
            let table = table(&["a", "b", "c", "d", "e"]);
            prop_assert_eq!(
                select_candidates(&text, k, &table),
                select_candidates(&text, k, &table)
            );
        }
    }

    // ==================== select_candidates Tests ====================

    #[test]
    fn test_select_matches_top_words_only() {
        let table = table(&["the", "of", "and", "to", "a", "in"]);
        let found = select_candidates("The history of a city in the north", 3, &table);
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["of".to_string(), "the".to_string()]
        );
    }

    #[test]
    fn test_select_collapses_duplicates() {
        let table = table(&["the", "of"]);
        let found = select_candidates("the the THE The of of", 2, &table);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_select_tokenizes_on_whitespace_only() {
        let table = table(&["the", "of"]);
        // Punctuation stays attached to the token.
        let found = select_candidates("End of the.\nthe,\tof", 2, &table);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["of".to_string()]);
    }

    #[test]
    fn test_select_with_zero_count_is_empty() {
        let table = table(&["the"]);
        assert!(select_candidates("the the", 0, &table).is_empty());
    }

    // ==================== SwitchSpec Tests ====================

    #[test]
    fn test_switch_spec_validation() {
        assert!(SwitchSpec::new(Language::ENGLISH, Language::SWEDISH, 0.0).is_ok());
        assert!(SwitchSpec::new(Language::ENGLISH, Language::SWEDISH, 100.0).is_ok());
        assert!(SwitchSpec::new(Language::ENGLISH, Language::SWEDISH, -1.0).is_err());
        assert!(SwitchSpec::new(Language::ENGLISH, Language::SWEDISH, 100.5).is_err());
        assert!(SwitchSpec::new(Language::ENGLISH, Language::SWEDISH, f64::NAN).is_err());

        let err = SwitchSpec::new(Language::ENGLISH, Language::ENGLISH, 50.0).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
