//! Runs the `trybuild` compile-fail corpus under `tests/compile-fail/`.

#[test]
fn ui() {
    let t = trybuild::TestCases::new();
    t.compile_fail("tests/compile-fail/*.rs");
}
