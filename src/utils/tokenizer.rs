use std::collections::HashSet;

/// Minimum token length stored in the word index.
/// Single characters match far too many labels to be useful search terms.
pub const MIN_WORD_LENGTH: usize = 2;

/// Tokens never stored in the word index: units, connectives and
/// corporate-entity suffixes that appear in a large share of drug labels.
pub const STOP_WORDS: &[&str] = &[
    "ltd", "product", "physical", "object", "of", "with", "uk", "for", "and", "to", "in", "ml",
    "or", "by", "on", "at", "vi",
];

/// Split text into lowercase alphanumeric tokens.
///
/// Every character outside `[a-z0-9]` (after lowercasing) is a boundary, so
/// `"Paracetamol 500mg/5ml"` yields `paracetamol`, `500mg`, `5ml`.
pub fn split_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

/// Check if a token is on the stop list
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Extract the distinct words a label contributes to the word index
pub fn extract_index_words(text: &str) -> HashSet<String> {
    split_words(text)
        .filter(|token| token.len() >= MIN_WORD_LENGTH && !is_stop_word(token))
        .collect()
}

/// Extract the distinct words a label contributes to the autocomplete vocabulary.
/// Unlike the word index, nothing is dropped here.
pub fn extract_vocabulary(text: &str) -> HashSet<String> {
    split_words(text).collect()
}

/// Normalize a user-supplied query word to the form stored in the index
pub fn normalize_query_word(word: &str) -> String {
    word.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        let tokens: Vec<_> = split_words("Paracetamol 500mg/5ml Oral-Suspension").collect();
        assert_eq!(tokens, vec!["paracetamol", "500mg", "5ml", "oral", "suspension"]);
    }

    #[test]
    fn test_split_non_ascii_is_boundary() {
        let tokens: Vec<_> = split_words("Ménière's disease").collect();
        assert_eq!(tokens, vec!["m", "ni", "re", "s", "disease"]);
    }

    #[test]
    fn test_extract_index_words_drops_short_and_stop_words() {
        let words = extract_index_words("Aspirin 75mg tablets (Bayer Ltd) x 28 for oral use");
        assert!(words.contains("aspirin"));
        assert!(words.contains("75mg"));
        assert!(words.contains("bayer"));
        assert!(words.contains("28"));
        assert!(!words.contains("ltd"));
        assert!(!words.contains("for"));
        assert!(!words.contains("x"));
    }

    #[test]
    fn test_extract_index_words_deduplicates() {
        let words = extract_index_words("Insulin insulin INSULIN");
        assert_eq!(words.len(), 1);
    }

    #[test]
    fn test_vocabulary_keeps_everything() {
        let words = extract_vocabulary("Vitamin B of x");
        assert!(words.contains("b"));
        assert!(words.contains("of"));
        assert!(words.contains("x"));
    }

    #[test]
    fn test_normalize_query_word() {
        assert_eq!(normalize_query_word("  Aspirin "), "aspirin");
    }
}
