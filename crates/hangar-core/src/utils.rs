//! Utility functions shared across Hangar crates.

/// Truncate a string to at most `max_bytes`, ensuring the cut falls on a
/// UTF-8 character boundary. Returns the original string if already short enough.
#[must_use]
pub fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_untouched() {
        assert_eq!(truncate_to_boundary("traceback", 64), "traceback");
    }

    #[test]
    fn ascii_is_cut_exactly() {
        assert_eq!(truncate_to_boundary("ModuleNotFoundError", 6), "Module");
    }

    #[test]
    fn multibyte_cut_backs_off() {
        // 'é' is 2 bytes in UTF-8
        let s = "café";
        assert_eq!(truncate_to_boundary(s, 4), "caf");
        assert_eq!(truncate_to_boundary(s, 5), "café");
    }

    #[test]
    fn zero_budget_is_empty() {
        assert_eq!(truncate_to_boundary("stderr", 0), "");
    }
}
