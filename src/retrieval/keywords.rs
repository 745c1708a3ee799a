use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::config::RetrievalConfig;

fn cjk_runs() -> &'static Regex {
    static CJK: OnceLock<Regex> = OnceLock::new();
    CJK.get_or_init(|| Regex::new(r"[\u{4e00}-\u{9fff}]+").expect("Invalid regex pattern"))
}

fn latin_words() -> &'static Regex {
    static LATIN: OnceLock<Regex> = OnceLock::new();
    LATIN.get_or_init(|| Regex::new(r"[A-Za-z0-9]+").expect("Invalid regex pattern"))
}

/// Keyword candidates for anchor lookup.
///
/// A recognised module name contributes itself and its configured aliases, and
/// then no free tokens are added. Otherwise CJK runs and latin words above the
/// configured lengths are used, minus stop words.
pub fn extract_keywords(objective: &str, config: &RetrievalConfig) -> BTreeSet<String> {
    let mut keywords = BTreeSet::new();

    for (module, aliases) in &config.modules {
        if objective.contains(module.as_str()) {
            keywords.insert(module.clone());
            keywords.extend(aliases.iter().filter(|a| !a.is_empty()).cloned());
        }
    }
    if !keywords.is_empty() {
        return keywords;
    }

    let is_stop_word = |word: &str| config.stop_words.iter().any(|s| s.eq_ignore_ascii_case(word));

    for m in cjk_runs().find_iter(objective) {
        let word = m.as_str();
        if word.chars().count() >= config.min_cjk_len && !is_stop_word(word) {
            keywords.insert(word.to_string());
        }
    }
    for m in latin_words().find_iter(objective) {
        let word = m.as_str();
        if word.len() >= config.min_word_len && !is_stop_word(word) {
            keywords.insert(word.to_string());
        }
    }

    keywords
}
