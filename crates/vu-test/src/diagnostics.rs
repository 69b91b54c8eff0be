//! Readable failures for "is this block of text in the output" assertions.
//!
//! A failed containment check on multi-line text usually means one line differs. Instead of
//! printing the whole output, the haystack is narrowed to the region that best lines up with the
//! needle, and the two are diffed.

/// The longest prefix of `needle` that occurs somewhere in `haystack`.
fn longest_contained_prefix<'a>(needle: &'a str, haystack: &str) -> &'a str {
    let mut end = 0;
    for (index, char) in needle.char_indices() {
        let next = index + char.len_utf8();
        if !haystack.contains(&needle[..next]) {
            break;
        }
        end = next;
    }
    &needle[..end]
}

/// The longest suffix of `needle` that occurs somewhere in `haystack`.
fn longest_contained_suffix<'a>(needle: &'a str, haystack: &str) -> &'a str {
    let mut start = needle.len();
    for (index, _) in needle.char_indices().rev() {
        if !haystack.contains(&needle[index..]) {
            break;
        }
        start = index;
    }
    &needle[start..]
}

/// Cut `haystack` down to the part that should have matched `needle`.
///
/// The result starts with the longest prefix of the needle found in the haystack, ends with the
/// longest suffix found in it, and contains whatever the haystack has between the first
/// occurrence of the former and the last occurrence of the latter.
pub fn narrow_haystack(needle: &str, haystack: &str) -> String {
    let beginning = longest_contained_prefix(needle, haystack);
    let end = longest_contained_suffix(needle, haystack);

    let after_beginning = if beginning.is_empty() {
        haystack
    } else {
        haystack
            .split_once(beginning)
            .map_or(haystack, |(_, after)| after)
    };
    let middle = if end.is_empty() {
        after_beginning
    } else {
        after_beginning
            .rsplit_once(end)
            .map_or(after_beginning, |(before, _)| before)
    };

    format!("{beginning}{middle}{end}")
}

/// A unified diff between `needle` and the narrowed `haystack`.
pub fn containment_diff(needle: &str, haystack: &str) -> String {
    let narrowed = narrow_haystack(needle, haystack);
    similar::TextDiff::from_lines(needle, narrowed.as_str())
        .unified_diff()
        .header("expected", "actual")
        .to_string()
}

/// Explain why `needle` is not in `haystack`, or return `None` if it is.
pub fn explain_missing(needle: &str, haystack: &str) -> Option<String> {
    if haystack.contains(needle) {
        return None;
    }
    if needle.contains('\n') {
        Some(format!(
            "expected text not found in output; closest match:\n{}",
            containment_diff(needle, haystack)
        ))
    } else {
        Some(format!(
            "`{needle}` not found in:\n----- output -----\n{haystack}\n------------------"
        ))
    }
}

/// Assert that `$haystack` contains `$needle`, with a narrowed diff on failure.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr $(,)?) => {{
        let (haystack, needle) = (&$haystack, &$needle);
        let haystack: &str = ::std::convert::AsRef::<str>::as_ref(haystack);
        let needle: &str = ::std::convert::AsRef::<str>::as_ref(needle);
        if let Some(explanation) = $crate::diagnostics::explain_missing(needle, haystack) {
            panic!("{explanation}");
        }
    }};
}
