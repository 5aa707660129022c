//! Splits text into segments short enough for the synthesis endpoint.

use tracing::debug;

/// Default segment limit in characters. The endpoint rejects longer input.
pub const DEFAULT_MAX_LENGTH: usize = 100;

/// A break point, tried in priority order.
///
/// `keep` is how many leading characters of the delimiter stay attached to the
/// segment before the cut; the rest (whitespace) is dropped.
struct Delimiter {
    pattern: &'static str,
    keep: usize,
}

const DELIMITERS: [Delimiter; 7] = [
    Delimiter { pattern: "\n\n", keep: 0 },
    Delimiter { pattern: "\n", keep: 0 },
    Delimiter { pattern: ". ", keep: 1 },
    Delimiter { pattern: ", ", keep: 1 },
    Delimiter { pattern: " ", keep: 0 },
    Delimiter { pattern: ".", keep: 1 },
    Delimiter { pattern: ",", keep: 1 },
];

/// One piece of the source text, synthesized and played as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub index: usize,
    pub text: String,
    pub total: usize,
}

/// Split `text` into non-empty pieces of at most `max_length` characters.
pub fn split(text: &str, max_length: usize) -> Vec<String> {
    let max_length = max_length.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    loop {
        if chars.len() - start <= max_length {
            pieces.push(chars[start..].iter().collect::<String>());
            break;
        }

        let window_end = start + max_length;
        let (end, next) = find_cut(&chars, start, window_end).unwrap_or((window_end, window_end));
        pieces.push(chars[start..end].iter().collect::<String>());
        start = next;
    }

    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Split `text` and number the pieces.
pub fn segment(text: &str, max_length: usize) -> Vec<TextSegment> {
    let pieces = split(text, max_length);
    let total = pieces.len();
    debug!("Split {} chars into {} segments", text.chars().count(), total);
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextSegment { index, text, total })
        .collect()
}

/// Returns `(segment_end, next_start)` for the highest-priority delimiter
/// found in `[start, end)`.
fn find_cut(chars: &[char], start: usize, end: usize) -> Option<(usize, usize)> {
    DELIMITERS.iter().find_map(|delim| {
        let pattern: Vec<char> = delim.pattern.chars().collect();
        rfind(chars, &pattern, start, end)
            .filter(|&idx| idx > start)
            .map(|idx| (idx + delim.keep, idx + pattern.len()))
    })
}

/// Last index `i` in `[start, end - pattern.len()]` where `pattern` matches.
fn rfind(chars: &[char], pattern: &[char], start: usize, end: usize) -> Option<usize> {
    if end < start + pattern.len() {
        return None;
    }
    (start..=end - pattern.len())
        .rev()
        .find(|&i| chars[i..i + pattern.len()] == *pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_lens(pieces: &[String]) -> Vec<usize> {
        pieces.iter().map(|p| p.chars().count()).collect()
    }

    /// Collapse every whitespace run to one space so rejoined segments can be
    /// compared with the source.
    fn normalize(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_text_is_one_segment() {
        assert_eq!(split("Hello world", 100), vec!["Hello world"]);
    }

    #[test]
    fn text_without_delimiters_is_cut_hard() {
        let text = "a".repeat(150);
        let pieces = split(&text, 100);
        assert_eq!(char_lens(&pieces), vec![100, 50]);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn sentence_boundary_keeps_the_period() {
        let pieces = split("First sentence. Second sentence.", 20);
        assert_eq!(pieces, vec!["First sentence.", "Second sentence."]);
    }

    #[test]
    fn paragraph_break_beats_later_sentence_break() {
        let text = "One two.\n\nThree four. Five six seven eight";
        let pieces = split(text, 30);
        assert_eq!(pieces[0], "One two.");
        assert!(pieces[1].starts_with("Three four."));
    }

    #[test]
    fn last_space_in_window_is_used() {
        let pieces = split("aaa bbb ccc ddd", 10);
        assert_eq!(pieces, vec!["aaa bbb", "ccc ddd"]);
    }

    #[test]
    fn delimiter_only_text_yields_no_empty_segments() {
        for text in ["\n\n\n\n\n\n", "          ", ". . . . . . ", ",,,,,,,,,,,,"] {
            let pieces = split(text, 3);
            assert!(pieces.iter().all(|p| !p.is_empty()), "{text:?} -> {pieces:?}");
            assert!(char_lens(&pieces).iter().all(|&n| n <= 3));
        }
    }

    #[test]
    fn delimiter_at_window_start_is_ignored() {
        // The second window starts on the space, so it falls back to a hard
        // cut and the space stays in the segment.
        let pieces = split("abc defghijkl", 3);
        assert_eq!(pieces, vec!["abc", " de", "fgh", "ijk", "l"]);
    }

    #[test]
    fn length_is_counted_in_chars() {
        let text = "ж".repeat(150);
        let pieces = split(&text, 100);
        assert_eq!(char_lens(&pieces), vec![100, 50]);

        let text = "Привіт світ. Як справи? Усе добре, дякую.";
        let pieces = split(text, 20);
        assert!(char_lens(&pieces).iter().all(|&n| n <= 20));
        assert_eq!(normalize(&pieces.join(" ")), normalize(text));
    }

    #[test]
    fn segments_rebuild_the_source() {
        let text = "Rust is a multi-paradigm, general-purpose programming language.\n\
                    It emphasizes performance, type safety, and concurrency.\n\n\
                    Rust enforces memory safety without a garbage collector, \
                    which makes it a good fit for systems programming.";
        for max in [16, 25, 40, 100] {
            let pieces = split(text, max);
            assert!(char_lens(&pieces).iter().all(|&n| n <= max));
            assert!(pieces.iter().all(|p| !p.is_empty()));
            assert_eq!(normalize(&pieces.join(" ")), normalize(text), "max {max}");
        }
    }

    #[test]
    fn empty_text_has_no_segments() {
        assert!(split("", 100).is_empty());
        assert!(segment("", 100).is_empty());
    }

    #[test]
    fn segments_are_numbered() {
        let segments = segment(&"word ".repeat(60), 100);
        assert_eq!(segments.len(), 3);
        for (i, s) in segments.iter().enumerate() {
            assert_eq!(s.index, i);
            assert_eq!(s.total, 3);
        }
    }
}
