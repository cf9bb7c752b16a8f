use crate::domain::Finding;

pub const DEFAULT_SCORE: u8 = 50;

/// Clamp a conformity score to `[0, 100]`; missing or unparseable scores become 50.
pub fn normalize_score(value: Option<i64>) -> u8 {
    match value {
        None => DEFAULT_SCORE,
        Some(v) => v.clamp(0, 100) as u8,
    }
}

/// Parse an integer out of a noisy string by keeping only ASCII digits and `-`.
///
/// `"12"`, `" 12 "`, `"chunk 12"` all parse to 12. Blank or malformed leftovers yield `None`.
pub fn parse_lenient_int(raw: &str) -> Option<i64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    if kept.is_empty() {
        return None;
    }
    kept.parse::<i64>().ok()
}

/// First run of ASCII digits in `text` (with an immediately preceding `-`), e.g. `"72/100"` → 72.
///
/// Runs too long for `i64` saturate instead of being dropped.
pub fn first_integer(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;
    let end = bytes[start..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map(|n| start + n)
        .unwrap_or(bytes.len());
    let negative = start > 0 && bytes[start - 1] == b'-';
    // A non-empty ASCII digit run only fails to parse on overflow.
    let value = text[start..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}

/// Score written as text ("72", "72/100", "Punteggio: 72"): first integer token, clamped.
pub fn score_from_text(text: &str) -> u8 {
    normalize_score(first_integer(text))
}

/// Trimmed value, or `None` when absent or blank.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Cut `text` (trimmed) to at most `max_chars` characters, appending `…` when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        None => trimmed.to_string(),
        Some((byte_idx, _)) => format!("{}…", &trimmed[..byte_idx]),
    }
}

/// Strip one leading bullet (`-`, `*`, `•`) and one leading ordinal (`1.`, `2)`).
pub fn clean_bullet_line(line: &str) -> &str {
    let mut s = line.trim();

    if let Some(rest) = s.strip_prefix(['-', '*', '•']) {
        if rest.starts_with(char::is_whitespace) {
            s = rest.trim_start();
        }
    }

    let digits = s.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(after) = s[digits..].strip_prefix(['.', ')']) {
            if after.starts_with(char::is_whitespace) {
                s = after.trim_start();
            }
        }
    }

    s.trim()
}

/// Turn a bullet-list section (legacy output, or a legacy stored row) into uncited findings.
///
/// Blank lines are dropped. If no line survives but the text is not blank, the whole
/// trimmed text becomes a single finding.
pub fn findings_from_bullet_text(raw: &str) -> Vec<Finding> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let findings: Vec<Finding> = trimmed
        .lines()
        .map(clean_bullet_line)
        .filter(|line| !line.is_empty())
        .map(Finding::uncited)
        .collect();

    if findings.is_empty() {
        return vec![Finding::uncited(trimmed)];
    }
    findings
}
