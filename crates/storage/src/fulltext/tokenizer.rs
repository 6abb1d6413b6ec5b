//! Text tokenization for the full-text index
//!
//! - Markup tags are dropped
//! - Lowercase
//! - Split on non-alphanumeric characters
//! - Tokens shorter than 2 characters are dropped

/// Tokenize plain text into index terms
///
/// # Example
///
/// ```
/// use doctx_storage::fulltext::tokenizer::tokenize;
///
/// assert_eq!(tokenize("Fix the Login-page!"), vec!["fix", "the", "login", "page"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() >= 2)
        .map(String::from)
        .collect()
}

/// Tokenize markup, ignoring everything inside `<...>`
pub fn tokenize_markup(markup: &str) -> Vec<String> {
    let mut text = String::with_capacity(markup.len());
    let mut in_tag = false;
    for c in markup.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    tokenize(&text)
}

/// Tokenize and deduplicate, keeping first-seen order
pub fn tokenize_unique(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_filters_short() {
        assert_eq!(tokenize("I am a test"), vec!["am", "test"]);
    }

    #[test]
    fn test_tokenize_non_ascii() {
        assert_eq!(tokenize("Привет, мир"), vec!["привет", "мир"]);
    }

    #[test]
    fn test_markup_tags_ignored() {
        assert_eq!(
            tokenize_markup("<p>Hello <strong>world</strong></p>"),
            vec!["hello", "world"]
        );
    }

    #[test]
    fn test_unique_preserves_order() {
        assert_eq!(tokenize_unique("bug Bug fix bug"), vec!["bug", "fix"]);
    }
}
