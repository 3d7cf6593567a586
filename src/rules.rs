use regex::Regex;

/// One predicate rule: a label and the compiled pattern that triggers it.
///
/// Rule sets are evaluated in declaration order with first-match-wins
/// semantics, keeping each rule independently testable.
pub struct Rule<T> {
    pub label: T,
    pub pattern: Regex,
}

impl<T> Rule<T> {
    pub fn new(label: T, pattern: &str) -> Self {
        Self {
            label,
            pattern: Regex::new(pattern).expect("rule pattern must compile"),
        }
    }
}

/// Evaluate an ordered rule list against `text`, returning the first rule
/// that matches.
pub fn first_match<'a, T>(rules: &'a [Rule<T>], text: &str) -> Option<&'a Rule<T>> {
    rules.iter().find(|r| r.pattern.is_match(text))
}
