use std::time::Duration;

use unicode_width::UnicodeWidthStr;

/// Short human-readable elapsed time: `420ms`, `3.2s`, `2m 13s`.
pub fn format_elapsed(d: Duration) -> String {
    let ms = d.as_millis() as u64;
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

/// Pad `s` with spaces to `width` terminal columns.
pub fn pad_to(s: &str, width: usize) -> String {
    let w = UnicodeWidthStr::width(s);
    if w >= width {
        s.to_string()
    } else {
        format!("{s}{}", " ".repeat(width - w))
    }
}

/// A horizontal rule as wide as `s` renders.
pub fn rule_for(s: &str) -> String {
    "─".repeat(UnicodeWidthStr::width(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formats() {
        assert_eq!(format_elapsed(Duration::from_millis(42)), "42ms");
        assert_eq!(format_elapsed(Duration::from_millis(14_600)), "14.6s");
        assert_eq!(format_elapsed(Duration::from_secs(133)), "2m 13s");
    }

    #[test]
    fn width_aware_padding() {
        assert_eq!(pad_to("ab", 4), "ab  ");
        assert_eq!(pad_to("abcdef", 4), "abcdef");
        // CJK characters take two columns
        assert_eq!(pad_to("日本", 6), "日本  ");
        assert_eq!(rule_for("日本"), "────");
    }
}
