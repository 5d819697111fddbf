pub const MAX_TITLE_CHARS: usize = 100;

/// Collapse whitespace, undo doubled titles ("A B A B" → "A B"), cap length.
pub fn normalize(raw: &str) -> String {
    let words: Vec<&str> = raw.split_whitespace().collect();
    let words = dedupe_halves(&words);
    truncate_words(&words.join(" "), MAX_TITLE_CHARS)
}

fn dedupe_halves<'a>(words: &'a [&'a str]) -> &'a [&'a str] {
    if words.is_empty() || words.len() % 2 != 0 {
        return words;
    }
    let (first, second) = words.split_at(words.len() / 2);
    if first == second {
        first
    } else {
        words
    }
}

fn truncate_words(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }

    let cut = s
        .char_indices()
        .nth(max)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let head = &s[..cut];

    // Next char is a space: the head already ends on a word.
    let body = if s[cut..].starts_with(' ') {
        head
    } else {
        match head.rfind(' ') {
            Some(i) if i > 0 => &head[..i],
            _ => head,
        }
    };

    format!("{}...", body.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize("  Spring \n\t Concert  "), "Spring Concert");
    }

    #[test]
    fn doubled_title() {
        assert_eq!(normalize("BRAVE DAY BRAVE DAY"), "BRAVE DAY");
        assert_eq!(normalize("BRAVE DAY\nBRAVE   DAY"), "BRAVE DAY");
    }

    #[test]
    fn odd_word_count_untouched() {
        assert_eq!(normalize("Tiger Pride Night"), "Tiger Pride Night");
    }

    #[test]
    fn even_but_different_halves() {
        assert_eq!(normalize("Band Camp Starts Monday"), "Band Camp Starts Monday");
    }

    #[test]
    fn empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \n "), "");
    }

    #[test]
    fn long_title_cut_at_word() {
        let raw = "Parents are invited to join us for the annual fall open house where teachers will present \
                   the curriculum and answer questions about the upcoming school year events";
        assert!(raw.chars().count() > 150);
        let t = normalize(raw);
        assert!(t.chars().count() <= MAX_TITLE_CHARS + 3);
        assert!(t.ends_with("..."));
        let body = t.trim_end_matches("...");
        assert!(raw.starts_with(body));
        // Ends on a full word of the source.
        let next = raw[body.len()..].chars().next();
        assert_eq!(next, Some(' '));
    }

    #[test]
    fn exactly_max_not_truncated() {
        let raw = "a".repeat(MAX_TITLE_CHARS);
        assert_eq!(normalize(&raw), raw);
    }

    #[test]
    fn single_long_word_hard_cut() {
        let raw = "x".repeat(150);
        let t = normalize(&raw);
        assert_eq!(t.chars().count(), MAX_TITLE_CHARS + 3);
    }

    #[test]
    fn multibyte_safe() {
        let raw = "é".repeat(120);
        let t = normalize(&raw);
        assert!(t.ends_with("..."));
    }
}
