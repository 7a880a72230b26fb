/// String parsing helpers for CLI option values.
pub struct StringUtil;

impl StringUtil {
    /// Parse a human time span into seconds.
    ///
    /// A bare number is seconds; an `s`, `m`, `h` or `d` suffix scales it
    /// (case-insensitive). Returns `None` for anything else.
    ///
    /// Examples: `"30"` → 30, `"45s"` → 45, `"15m"` → 900, `"1h"` → 3600.
    pub fn parse_time_span(value: &str) -> Option<u64> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        let (digits, unit) = match value.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], Some(c)),
            _ => (value, None),
        };

        let count: u64 = digits.trim().parse().ok()?;
        let scale = match unit.map(|c| c.to_ascii_lowercase()) {
            None | Some('s') => 1,
            Some('m') => 60,
            Some('h') => 60 * 60,
            Some('d') => 24 * 60 * 60,
            _ => return None,
        };

        count.checked_mul(scale)
    }

    /// Parse a metric byte size into bytes.
    ///
    /// A bare number is bytes; a `k`, `m` or `g` suffix scales by powers of
    /// 1024 (case-insensitive). Returns `None` for anything else.
    ///
    /// Examples: `"4096"` → 4096, `"64k"` → 65536, `"1M"` → 1048576.
    pub fn parse_metric(value: &str) -> Option<u64> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        let (digits, unit) = match value.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], Some(c)),
            _ => (value, None),
        };

        let count: u64 = digits.trim().parse().ok()?;
        let scale: u64 = match unit.map(|c| c.to_ascii_lowercase()) {
            None => 1,
            Some('k') => 1 << 10,
            Some('m') => 1 << 20,
            Some('g') => 1 << 30,
            _ => return None,
        };

        count.checked_mul(scale)
    }
}
