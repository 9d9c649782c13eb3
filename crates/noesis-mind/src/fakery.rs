/// Substrings that indicate a thought is describing placeholder or mock output
/// rather than real work (§4.8 step 4 "fakery dictionary"), checked case-insensitively.
const FAKERY_DICTIONARY: &[&str] = &[
    "example output",
    "mock data",
    "placeholder",
    "lorem ipsum",
    "for demonstration purposes",
    "this is a sample",
    "fake result",
];

/// §4.8 step 4: declare fakery if any of the last 3 thoughts contains a dictionary
/// substring.
pub fn is_faking(recent_thoughts: &[String]) -> bool {
    recent_thoughts.iter().any(|thought| {
        let lower = thought.to_lowercase();
        FAKERY_DICTIONARY.iter().any(|term| lower.contains(term))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_placeholder_language() {
        let thoughts = vec![
            "Started reading the config file.".to_string(),
            "Here is a placeholder result for the analysis.".to_string(),
        ];
        assert!(is_faking(&thoughts));
    }

    #[test]
    fn test_case_insensitive() {
        let thoughts = vec!["This Is A SAMPLE response only.".to_string()];
        assert!(is_faking(&thoughts));
    }

    #[test]
    fn test_no_match_on_genuine_thoughts() {
        let thoughts = vec![
            "Read the README and found the build instructions.".to_string(),
            "Wrote a summary of the three open issues.".to_string(),
        ];
        assert!(!is_faking(&thoughts));
    }
}
