// SPDX-License-Identifier: MPL-2.0
//! Surrounding text for a change, used as classifier input.

use memchr::memmem;

/// Slice of `current_content` around the edited text.
///
/// The first occurrence of `after_text` in `current_content` is used. When it occurs several
/// times and `before_text` is found in `previous_content`, the occurrence whose byte offset is
/// closest to that of `before_text` wins (the earlier one on ties). The window extends half
/// the match length on each side, clamped to the content and to character boundaries, so it
/// is never longer than twice the match.
///
/// Without a match the edited text itself is returned: `after_text`, or `before_text` for
/// removals.
pub fn build_context(
    after_text: &str,
    before_text: &str,
    current_content: &str,
    previous_content: &str,
) -> String {
    if after_text.is_empty() {
        return before_text.to_string();
    }

    let occurrences: Vec<usize> =
        memmem::find_iter(current_content.as_bytes(), after_text.as_bytes()).collect();
    let Some(&first) = occurrences.first() else {
        return after_text.to_string();
    };

    let mut position = first;
    if occurrences.len() > 1 && !before_text.is_empty() {
        if let Some(anchor) = memmem::find(previous_content.as_bytes(), before_text.as_bytes()) {
            position = occurrences
                .iter()
                .copied()
                .min_by_key(|offset| offset.abs_diff(anchor))
                .unwrap_or(first);
        }
    }

    window(current_content, position, after_text.len()).to_string()
}

fn window(content: &str, position: usize, length: usize) -> &str {
    let half = length / 2;
    let mut start = position.saturating_sub(half);
    let mut end = position
        .saturating_add(length)
        .saturating_add(half)
        .min(content.len());

    while !content.is_char_boundary(start) {
        start += 1;
    }
    while !content.is_char_boundary(end) {
        end -= 1;
    }

    &content[start..end.max(start)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn window_around_single_match() {
        let content = "0123456789ABCDEFGHIJ";
        // match "ABCD" at 10, half = 2
        assert_eq!(build_context("ABCD", "", content, ""), "89ABCDEF");
    }

    #[test]
    fn window_clamped_at_edges() {
        let content = "ABCDxyz";
        assert_eq!(build_context("ABCD", "", content, ""), "ABCDxy");
        assert_eq!(build_context("xyz", "", content, ""), "Dxyz");
    }

    #[test]
    fn missing_match_falls_back_to_raw_text() {
        assert_eq!(build_context("new words", "", "unrelated", ""), "new words");
        assert_eq!(build_context("", "removed", "unrelated", "removed"), "removed");
    }

    #[test]
    fn repeated_match_picks_closest_to_previous_position() {
        let current = format!("same{}same", ".".repeat(36));
        let previous = format!("{}old.", ".".repeat(38));
        // "old" sits at offset 38, closer to the second "same" at 40
        assert_eq!(build_context("same", "old", &current, &previous), "..same");
        // without a before text the first occurrence is used
        assert_eq!(build_context("same", "", &current, &previous), "same..");
    }

    #[test]
    fn respects_char_boundaries() {
        let content = "日本語のテキストです";
        let context = build_context("テキスト", "", content, "");
        assert!(context.contains("テキスト"));
        assert!(context.len() <= 2 * "テキスト".len());
    }

    proptest! {
        #[test]
        fn context_never_exceeds_twice_the_match(
            content in ".{0,200}",
            start in 0usize..200,
            length in 1usize..50,
        ) {
            let boundaries: Vec<usize> = content
                .char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(content.len()))
                .collect();
            let from = boundaries[start % boundaries.len()];
            let to = boundaries
                .iter()
                .copied()
                .find(|&b| b >= from + length)
                .unwrap_or(content.len());
            let needle = &content[from..to];

            let context = build_context(needle, "", &content, "");
            if needle.is_empty() {
                prop_assert!(context.is_empty());
            } else {
                prop_assert!(context.contains(needle));
                prop_assert!(context.len() <= 2 * needle.len());
            }
        }
    }
}
