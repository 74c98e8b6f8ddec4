/// Find the sequence of `pattern` lines within `lines`, starting the search at
/// or after `start`. Returns the index of the first line of the match, or
/// `None`. Matching is byte-for-byte: no whitespace normalization and no fuzz.
/// When `eof` is true the pattern is anchored at the end of the file and only
/// a match in that final position is accepted.
pub(crate) fn seek_sequence(
    lines: &[String],
    pattern: &[String],
    start: usize,
    eof: bool,
) -> Option<usize> {
    if pattern.is_empty() {
        return Some(start);
    }
    if pattern.len() > lines.len() {
        return None;
    }
    if eof {
        let anchor = lines.len() - pattern.len();
        if anchor >= start && lines[anchor..] == *pattern {
            return Some(anchor);
        }
        return None;
    }
    for i in start..=lines.len() - pattern.len() {
        if lines[i..i + pattern.len()] == *pattern {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::seek_sequence;

    fn to_vec(strings: &[&str]) -> Vec<String> {
        strings.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_finds_sequence() {
        let lines = to_vec(&["foo", "bar", "baz"]);
        let pattern = to_vec(&["bar", "baz"]);
        assert_eq!(seek_sequence(&lines, &pattern, 0, false), Some(1));
    }

    #[test]
    fn whitespace_differences_do_not_match() {
        let lines = to_vec(&["foo   ", "bar\t"]);
        let pattern = to_vec(&["foo", "bar"]);
        assert_eq!(seek_sequence(&lines, &pattern, 0, false), None);
    }

    #[test]
    fn search_respects_start_index() {
        let lines = to_vec(&["a", "b", "a", "b"]);
        let pattern = to_vec(&["a", "b"]);
        assert_eq!(seek_sequence(&lines, &pattern, 1, false), Some(2));
    }

    #[test]
    fn eof_anchors_at_end() {
        let lines = to_vec(&["x", "y", "x"]);
        let pattern = to_vec(&["x"]);
        assert_eq!(seek_sequence(&lines, &pattern, 0, true), Some(2));
    }

    #[test]
    fn pattern_longer_than_input_returns_none() {
        let lines = to_vec(&["just one line"]);
        let pattern = to_vec(&["too", "many", "lines"]);
        assert_eq!(seek_sequence(&lines, &pattern, 0, false), None);
    }
}
