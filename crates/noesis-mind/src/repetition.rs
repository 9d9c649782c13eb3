use std::collections::HashSet;

/// Minimum token length counted toward an overlap (§4.8 step 4: "3-letter-plus
/// overlap").
const MIN_TOKEN_LEN: usize = 3;

/// Split text into lowercase Latin/Hangul words of at least `MIN_TOKEN_LEN`
/// characters. Accepted as a parameter rather than hardwired per Open Question (c) —
/// other scripts plug in their own splitter.
pub type Tokenizer = Box<dyn Fn(&str) -> Vec<String>>;

/// Default tokenizer: Latin letters and the Hangul syllable block are word
/// characters; everything else is a separator.
pub fn default_tokenizer(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphabetic() || is_hangul(ch) {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.retain(|w| w.chars().count() >= MIN_TOKEN_LEN);
    words
}

fn is_hangul(ch: char) -> bool {
    matches!(ch as u32, 0xAC00..=0xD7A3 | 0x1100..=0x11FF | 0x3130..=0x318F)
}

/// Fraction of `a`'s tokens that also appear in `b`, over the smaller of the two
/// token sets — a Jaccard-like overlap ratio (Glossary "token overlap").
pub fn overlap_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let common = set_a.intersection(&set_b).count();
    let denom = set_a.len().min(set_b.len());
    common as f64 / denom as f64
}

const REPEAT_THRESHOLD: f64 = 0.5;
const REPEAT_MIN_HITS: usize = 2;

/// §4.8 step 4: compare the most recent task description against each of the
/// others; declare repeating if at least two comparisons exceed 50% token overlap.
pub fn is_repeating(descriptions: &[String], tokenize: &dyn Fn(&str) -> Vec<String>) -> bool {
    let Some((most_recent, rest)) = descriptions.split_first() else {
        return false;
    };
    let recent_tokens = tokenize(most_recent);
    let hits = rest
        .iter()
        .filter(|other| overlap_ratio(&recent_tokens, &tokenize(other)) > REPEAT_THRESHOLD)
        .count();
    hits >= REPEAT_MIN_HITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tokenizer_drops_short_words() {
        let words = default_tokenizer("go to the store and buy milk");
        assert!(!words.contains(&"go".to_string()));
        assert!(words.contains(&"store".to_string()));
    }

    #[test]
    fn test_default_tokenizer_handles_hangul() {
        let words = default_tokenizer("안녕하세요 world");
        assert!(words.iter().any(|w| w.contains('안') || w == "world"));
    }

    #[test]
    fn test_overlap_ratio_identical_sets() {
        let a = vec!["alpha".to_string(), "beta".to_string()];
        let b = vec!["alpha".to_string(), "beta".to_string()];
        assert_eq!(overlap_ratio(&a, &b), 1.0);
    }

    #[test]
    fn test_overlap_ratio_disjoint_sets() {
        let a = vec!["alpha".to_string()];
        let b = vec!["gamma".to_string()];
        assert_eq!(overlap_ratio(&a, &b), 0.0);
    }

    #[test]
    fn test_is_repeating_detects_two_similar_tasks() {
        let descriptions = vec![
            "summarize the quarterly report document".to_string(),
            "summarize the quarterly report file".to_string(),
            "summarize the quarterly report spreadsheet".to_string(),
            "write a poem about the ocean".to_string(),
            "plan a trip to the mountains".to_string(),
        ];
        assert!(is_repeating(&descriptions, &default_tokenizer));
    }

    #[test]
    fn test_is_repeating_false_for_diverse_tasks() {
        let descriptions = vec![
            "write a poem about the ocean".to_string(),
            "plan a trip to the mountains".to_string(),
            "review the open pull requests".to_string(),
            "draft an email to the team".to_string(),
            "research rust async runtimes".to_string(),
        ];
        assert!(!is_repeating(&descriptions, &default_tokenizer));
    }
}
