//! Parameterised resolution properties.
//!
//! Each `#[case]` is isolated; there is no shared state.

use kiln_core::{resolver, ConfigError, VarMap};
use rstest::rstest;

fn map(pairs: &[(&str, &str)]) -> VarMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[rstest]
#[case(&[("a", "x"), ("b", "${a}/y")], "b", "x/y")]
#[case(&[("dev", "src"), ("js", "scripts"), ("glob", "${dev}/${js}/*.js")], "glob", "src/scripts/*.js")]
#[case(&[("a", "1"), ("b", "${a}${a}"), ("c", "${b}-${b}")], "c", "11-11")]
#[case(&[("plain", "no templates here")], "plain", "no templates here")]
#[case(&[("spaced", "${ a }"), ("a", "v")], "spaced", "v")]
fn resolves_expected_value(
    #[case] pairs: &[(&str, &str)],
    #[case] key: &str,
    #[case] expected: &str,
) {
    let resolved = resolver::resolve(&map(pairs)).expect("resolve");
    assert_eq!(resolved[key], expected);
}

#[rstest]
#[case(&[("a", "${b}"), ("b", "${a}")])]
#[case(&[("a", "${a}")])]
#[case(&[("a", "${b}"), ("b", "${c}"), ("c", "${a}"), ("d", "ok")])]
fn cycles_are_detected(#[case] pairs: &[(&str, &str)]) {
    let err = resolver::resolve(&map(pairs)).unwrap_err();
    assert!(matches!(err, ConfigError::CyclicReference { .. }), "got: {err}");
}

#[rstest]
#[case(&[("a", "${b}")], "b")]
#[case(&[("a", "x"), ("b", "${a}/${nope}")], "nope")]
fn undefined_names_are_reported(#[case] pairs: &[(&str, &str)], #[case] missing: &str) {
    match resolver::resolve(&map(pairs)).unwrap_err() {
        ConfigError::UnresolvedReference { variable, .. } => assert_eq!(variable, missing),
        other => panic!("expected unresolved reference, got {other}"),
    }
}

#[rstest]
#[case(&[("a", "x"), ("b", "${a}/y")])]
#[case(&[("root", "/srv"), ("www", "${root}/www"), ("logs", "${www}/../logs")])]
#[case(&[("dollar", "$"), ("price", "${dollar}5")])]
#[case(&[("open", "cost: ${"), ("b", "${open}oops")])]
fn resolution_is_idempotent(#[case] pairs: &[(&str, &str)]) {
    let once = resolver::resolve(&map(pairs)).expect("resolve");
    assert_eq!(resolver::resolve(&once).expect("resolve twice"), once);
}

#[test]
fn resolution_is_deterministic() {
    let input = map(&[("a", "${b}"), ("b", "${c}"), ("c", "${a}")]);
    let first = resolver::resolve(&input).unwrap_err().to_string();
    for _ in 0..10 {
        assert_eq!(resolver::resolve(&input).unwrap_err().to_string(), first);
    }
}
