use std::sync::LazyLock;

use regex::Regex;

static NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N} '&.,@+()-]").expect("static pattern"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

/// Underscores become spaces, control and symbol noise is dropped, runs of
/// whitespace collapse. Case is kept.
pub fn sanitize(input: &str) -> String {
    let s = input.replace('_', " ");
    let s = SPACES.replace_all(&s, " ");
    let s = NOISE.replace_all(&s, "");

    SPACES.replace_all(s.trim(), " ").into_owned()
}

/// Lookup key for matching students to routes and stops by name.
pub fn name_key(input: &str) -> String {
    sanitize(input).to_lowercase()
}
