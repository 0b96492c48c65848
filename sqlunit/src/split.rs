//! Splitting of multi-statement scripts into individually executable statements.

use regex::Regex;
use std::sync::LazyLock;

/// A semicolon terminates a statement only at the end of a line or of the script.
static TERMINATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r";(\r?\n|$)").expect("statement terminator pattern is valid")
});

/// Split `script` into trimmed, non-empty statements, in the order they appear.
///
/// Statements may span several lines; a `;` in the middle of a line does not end one.
///
/// ```
/// let statements: Vec<_> =
///     sqlunit::split_statements("CREATE TABLE test;\nINSERT INTO test values(1);").collect();
/// assert_eq!(statements, ["CREATE TABLE test", "INSERT INTO test values(1)"]);
/// ```
pub fn split_statements(script: &str) -> impl Iterator<Item = &str> {
    TERMINATOR
        .split(script)
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
}

/// Number of statements [split_statements] would yield.
pub fn count_statements(script: &str) -> usize {
    split_statements(script).count()
}
