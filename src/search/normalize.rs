//! Text normalization shared by stored names and incoming queries.

/// Leading articles dropped at the start of a title or of a comma clause
/// (`"Legend of Zelda, The"`).
const ARTICLES: &[&str] = &["the", "a", "an"];

/// Disc/side markers dropped together with the designator that follows them.
const DISC_MARKERS: &[&str] = &["disc", "disk", "cd", "side"];

/// Normalizes free text for comparison.
///
/// Applied identically to catalog names (cached as `normalized_name`) and to
/// queries:
/// 1. a trailing file extension is removed (`.zip`, `.7z`; must contain a letter)
/// 2. bracketed and parenthetical tags are removed (`(USA)`, `[b]`)
/// 3. text is lower-cased, apostrophes are deleted, other punctuation becomes space
/// 4. leading articles of each comma clause and disc markers are dropped
/// 5. whitespace is collapsed
#[must_use]
pub fn normalize(text: &str) -> String {
    let stripped = strip_bracketed(strip_extension(text.trim()));

    let mut tokens: Vec<String> = Vec::new();
    for clause in stripped.split(',') {
        let mut clause_tokens = tokenize(clause);
        if clause_tokens
            .first()
            .is_some_and(|first| ARTICLES.contains(&first.as_str()))
            && clause_tokens.len() > 1
        {
            clause_tokens.remove(0);
        }
        tokens.extend(clause_tokens);
    }

    drop_disc_markers(tokens).join(" ")
}

/// Splits normalized text into its tokens.
#[must_use]
pub fn tokens(normalized: &str) -> Vec<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

fn strip_extension(text: &str) -> &str {
    let Some(dot) = text.rfind('.') else {
        return text;
    };
    let ext = &text[dot + 1..];
    let is_extension = dot > 0
        && (1..=4).contains(&ext.len())
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && ext.chars().any(|c| c.is_ascii_alphabetic());
    if is_extension { &text[..dot] } else { text }
}

fn strip_bracketed(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' if depth > 0 => {
                depth -= 1;
                out.push(' ');
            }
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}'))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

fn is_disc_designator(token: &str) -> bool {
    token.chars().all(|c| c.is_ascii_digit())
        || (token.len() == 1 && token.chars().all(|c| c.is_ascii_alphabetic()))
        || (token.len() <= 4 && token.chars().all(|c| matches!(c, 'i' | 'v' | 'x')))
}

fn drop_disc_markers(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if DISC_MARKERS.contains(&token.as_str())
            && iter.peek().is_some_and(|next| is_disc_designator(next))
        {
            iter.next();
            continue;
        }
        out.push(token);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_collapses_whitespace() {
        assert_eq!(normalize("  Super   MARIO  Land "), "super mario land");
    }

    #[test]
    fn test_normalize_strips_tags_and_extension() {
        assert_eq!(
            normalize("Super Mario Land (World) (Rev 1) [!].zip"),
            "super mario land"
        );
    }

    #[test]
    fn test_normalize_drops_trailing_article_clause() {
        assert_eq!(
            normalize("Legend of Zelda, The - Link's Awakening (USA).zip"),
            "legend of zelda links awakening"
        );
    }

    #[test]
    fn test_normalize_drops_leading_article() {
        assert_eq!(normalize("The Lost Vikings"), "lost vikings");
        // a lone article is kept rather than normalizing to nothing
        assert_eq!(normalize("A"), "a");
    }

    #[test]
    fn test_normalize_drops_disc_markers() {
        assert_eq!(normalize("Final Fantasy VII Disc 2"), "final fantasy vii");
        assert_eq!(normalize("Game - Side B"), "game");
        assert_eq!(normalize("CD Projekt"), "cd projekt");
    }

    #[test]
    fn test_normalize_keeps_version_numbers() {
        assert_eq!(normalize("Tool v1.1"), "tool v1 1");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize("Pokemon - Red Version (USA, Europe) (SGB Enhanced).zip");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_tokens_splits_on_spaces() {
        assert_eq!(tokens("super mario land"), vec!["super", "mario", "land"]);
        assert!(tokens("").is_empty());
    }
}
