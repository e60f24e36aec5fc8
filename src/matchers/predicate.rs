//! The closed predicate registry (spec §4.1). Each predicate is a pure
//! function over `(actual, expected)` strings; the registry mapping names
//! to predicates is built once and never mutated, mirroring how the
//! teacher treats its comparator set as an immutable, lock-free table
//! constructed at startup.

use std::collections::HashMap;
use std::sync::OnceLock;

use assert_json_diff::{assert_json_matches_no_panic, CompareMode, Config};
use regex::Regex;

/// The nine base predicates from spec §4.1. Each has a negated
/// counterpart, represented here as a `negated` flag rather than doubling
/// the enum — the evaluation logic is identical modulo polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    Equal,
    Resemble,
    AlmostEqual,
    ContainSubstring,
    StartWith,
    EndWith,
    EqualJson,
    Match,
    BeEmpty,
}

impl Predicate {
    fn eval(self, actual: &str, expected: &str) -> bool {
        match self {
            Predicate::Equal => actual == expected,
            Predicate::Resemble => resemble(actual, expected),
            Predicate::AlmostEqual => almost_equal(actual, expected),
            Predicate::ContainSubstring => actual.contains(expected),
            Predicate::StartWith => actual.starts_with(expected),
            Predicate::EndWith => actual.ends_with(expected),
            Predicate::EqualJson => equal_json(actual, expected),
            Predicate::Match => regex_match(actual, expected),
            Predicate::BeEmpty => actual.is_empty(),
        }
    }
}

fn resemble(actual: &str, expected: &str) -> bool {
    match (
        serde_json::from_str::<serde_json::Value>(actual),
        serde_json::from_str::<serde_json::Value>(expected),
    ) {
        (Ok(a), Ok(e)) => a == e,
        _ => actual == expected,
    }
}

fn almost_equal(actual: &str, expected: &str) -> bool {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(e)) => (a - e).abs() < 1e-6,
        _ => false,
    }
}

fn equal_json(actual: &str, expected: &str) -> bool {
    let (a, e) = match (
        serde_json::from_str::<serde_json::Value>(actual),
        serde_json::from_str::<serde_json::Value>(expected),
    ) {
        (Ok(a), Ok(e)) => (a, e),
        _ => return false,
    };
    assert_json_matches_no_panic(&a, &e, Config::new(CompareMode::Strict)).is_ok()
}

fn regex_match(actual: &str, expected: &str) -> bool {
    match Regex::new(expected) {
        Ok(re) => re.is_match(actual),
        Err(_) => false,
    }
}

/// A resolved predicate reference, combining the base predicate with its
/// polarity. Evaluation never panics: an unresolvable operand (e.g.
/// `AlmostEqual` on non-numeric input, or an invalid regex) evaluates to
/// `false` regardless of polarity — negating a failure never turns it
/// into a match (spec §4.1 "error conditions").
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPredicate {
    base: Predicate,
    negated: bool,
}

impl ResolvedPredicate {
    pub fn evaluate(self, actual: &str, expected: &str) -> bool {
        let result = self.base.eval(actual, expected);
        if self.negated {
            !result
        } else {
            result
        }
    }
}

fn registry() -> &'static HashMap<&'static str, ResolvedPredicate> {
    static REGISTRY: OnceLock<HashMap<&'static str, ResolvedPredicate>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let bases: &[(&str, Predicate)] = &[
            ("Equal", Predicate::Equal),
            ("Resemble", Predicate::Resemble),
            ("AlmostEqual", Predicate::AlmostEqual),
            ("ContainSubstring", Predicate::ContainSubstring),
            ("StartWith", Predicate::StartWith),
            ("EndWith", Predicate::EndWith),
            ("EqualJSON", Predicate::EqualJson),
            ("Match", Predicate::Match),
            ("BeEmpty", Predicate::BeEmpty),
        ];
        // `Should*` / `ShouldNot*` are accepted as aliases of the canonical
        // names above (spec §8 scenarios (iv)/(v) use `ShouldMatch` and
        // `ShouldEqual`, while §4.1's table gives the canonical names;
        // both resolve to the same registry entries — see DESIGN.md).
        let mut map = HashMap::new();
        for (name, base) in bases {
            map.insert(*name, ResolvedPredicate { base: *base, negated: false });
            let not_name: &'static str = Box::leak(format!("Not{name}").into_boxed_str());
            map.insert(not_name, ResolvedPredicate { base: *base, negated: true });

            let should_name: &'static str = Box::leak(format!("Should{name}").into_boxed_str());
            map.insert(should_name, ResolvedPredicate { base: *base, negated: false });
            let should_not_name: &'static str =
                Box::leak(format!("ShouldNot{name}").into_boxed_str());
            map.insert(should_not_name, ResolvedPredicate { base: *base, negated: true });
        }
        map
    })
}

/// Look up a predicate by its wire name. Returns `None` for any name
/// outside the closed set, including unknown predicates — callers turn
/// that into a match failure (evaluation) or a validation error
/// (registration).
pub fn resolve(name: &str) -> Option<ResolvedPredicate> {
    registry().get(name).copied()
}

/// Whether `name` is a recognized predicate name. Used by the
/// [`crate::matchers::BodyMatcher`] wire decoder to disambiguate a
/// single string-matcher object from a JSON-path map (spec §4.1 "BodyMatcher
/// dispatch").
pub fn is_known_predicate_name(name: &str) -> bool {
    registry().contains_key(name)
}

#[cfg(test)]
mod test {
    use super::*;

    fn eval(name: &str, actual: &str, expected: &str) -> bool {
        resolve(name).unwrap().evaluate(actual, expected)
    }

    #[test]
    fn equal_matches_identical_strings() {
        assert!(eval("Equal", "abc", "abc"));
        assert!(!eval("Equal", "abc", "abd"));
    }

    #[test]
    fn not_equal_is_the_negation_of_equal() {
        assert!(eval("NotEqual", "abc", "abd"));
        assert!(!eval("NotEqual", "abc", "abc"));
    }

    #[test]
    fn almost_equal_requires_numeric_operands() {
        assert!(eval("AlmostEqual", "1.0000001", "1.0"));
        assert!(!eval("AlmostEqual", "abc", "1.0"));
        assert!(!eval("NotAlmostEqual", "abc", "1.0"));
    }

    #[test]
    fn contains_substring_checks_inclusion() {
        assert!(eval("ContainSubstring", "hello world", "wor"));
        assert!(!eval("ContainSubstring", "hello world", "xyz"));
    }

    #[test]
    fn start_and_end_with() {
        assert!(eval("StartWith", "hello", "he"));
        assert!(eval("EndWith", "hello", "lo"));
    }

    #[test]
    fn equal_json_compares_structurally() {
        assert!(eval("EqualJSON", r#"{"a":1,"b":2}"#, r#"{"b":2,"a":1}"#));
        assert!(!eval("EqualJSON", r#"{"a":1}"#, r#"{"a":2}"#));
    }

    #[test]
    fn match_runs_a_regex() {
        assert!(eval("Match", "deadbeef", "^[0-9a-f]{8}$"));
        assert!(!eval("Match", "zzz", "^[0-9a-f]{8}$"));
    }

    #[test]
    fn invalid_regex_fails_rather_than_panics() {
        assert!(!eval("Match", "abc", "("));
    }

    #[test]
    fn be_empty_ignores_expected() {
        assert!(eval("BeEmpty", "", "whatever"));
        assert!(!eval("BeEmpty", "x", "whatever"));
    }

    #[test]
    fn should_prefixed_aliases_resolve_to_the_same_predicates() {
        assert!(eval("ShouldEqual", "alice", "alice"));
        assert!(eval("ShouldMatch", "deadbeef", "^[0-9a-f]{8}$"));
        assert!(eval("ShouldNotEqual", "alice", "bob"));
    }

    #[test]
    fn unknown_predicate_name_does_not_resolve() {
        assert!(resolve("Frobnicate").is_none());
    }
}
