//! Query shape classification, used to pick fusion weights before RRF.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryClass {
    Empty,
    Identifier,
    Short,
    NaturalLanguage,
}

impl QueryClass {
    /// Lexical/semantic weight pair used by [`crate::fusion`] for this class.
    /// `Empty` has no weights; the orchestrator short-circuits before fusion.
    pub fn fusion_weights(self) -> Option<(f64, f64)> {
        match self {
            QueryClass::Empty => None,
            QueryClass::Identifier => Some((0.7, 0.3)),
            QueryClass::Short => Some((0.5, 0.5)),
            QueryClass::NaturalLanguage => Some((0.3, 0.7)),
        }
    }
}

static IDENTIFIER_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_./-]*$").unwrap());
static TICKER_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{1,5}$").unwrap());

/// Classify an already-canonicalized query string.
///
/// Expects `canon_query` to be the output of [`crate::canonicalize::canonicalize`];
/// does not re-canonicalize it.
pub fn classify(canon_query: &str) -> QueryClass {
    if canon_query.trim().is_empty() {
        return QueryClass::Empty;
    }

    let no_whitespace = !canon_query.chars().any(char::is_whitespace);
    if no_whitespace && (IDENTIFIER_SHAPE.is_match(canon_query) || TICKER_SHAPE.is_match(canon_query))
    {
        return QueryClass::Identifier;
    }

    let token_count = canon_query.split_whitespace().count();
    if token_count <= 3 {
        return QueryClass::Short;
    }

    QueryClass::NaturalLanguage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_empty() {
        assert_eq!(classify(""), QueryClass::Empty);
        assert_eq!(classify("   "), QueryClass::Empty);
    }

    #[test]
    fn ticker_shape_is_identifier() {
        assert_eq!(classify("AAPL"), QueryClass::Identifier);
        assert_eq!(classify("GOOG"), QueryClass::Identifier);
        assert_eq!(classify("A"), QueryClass::Identifier);
    }

    #[test]
    fn path_like_is_identifier() {
        assert_eq!(classify("src/main.rs"), QueryClass::Identifier);
        assert_eq!(classify("user_id"), QueryClass::Identifier);
        assert_eq!(classify("com.example.App"), QueryClass::Identifier);
    }

    #[test]
    fn short_query_not_identifier_shaped() {
        assert_eq!(classify("login flow"), QueryClass::Short);
        assert_eq!(classify("a b c"), QueryClass::Short);
    }

    #[test]
    fn natural_language_over_three_tokens() {
        assert_eq!(
            classify("how does authentication work in oauth"),
            QueryClass::NaturalLanguage
        );
    }

    #[test]
    fn mixed_case_multi_token_is_not_identifier() {
        // Has whitespace, so the identifier/ticker shape never applies even
        // though each token alone might look identifier-like.
        assert_eq!(classify("AAPL stock"), QueryClass::Short);
    }

    #[test]
    fn six_uppercase_letters_is_not_ticker() {
        assert_eq!(classify("GOOGLE"), QueryClass::Identifier);
    }

    #[test]
    fn lowercase_six_letters_is_identifier_shape_not_ticker() {
        assert_eq!(classify("google"), QueryClass::Identifier);
    }

    #[test]
    fn fusion_weights_match_spec() {
        assert_eq!(QueryClass::Identifier.fusion_weights(), Some((0.7, 0.3)));
        assert_eq!(QueryClass::Short.fusion_weights(), Some((0.5, 0.5)));
        assert_eq!(QueryClass::NaturalLanguage.fusion_weights(), Some((0.3, 0.7)));
        assert_eq!(QueryClass::Empty.fusion_weights(), None);
    }

    #[test]
    fn classifier_is_total() {
        let samples = ["", "AAPL", "login flow", "how does auth work in oauth here today"];
        for s in samples {
            // classify never panics and always returns exactly one variant
            let _ = classify(s);
        }
    }
}
