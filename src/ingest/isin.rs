// src/ingest/isin.rs

/// ISIN length mandated by ISO 6166.
pub const ISIN_LEN: usize = 12;

/// Security-class character expected at index 2 for listed equities (`INE...`).
pub const EQUITY_CLASS: char = 'E';

/// Trim and upper-case a candidate; `None` when it is a known placeholder.
pub fn normalize_isin(candidate: &str) -> Option<String> {
    let t = candidate.trim().to_ascii_uppercase();
    if t.is_empty() || t == "N/A" || t == "NA" || t == "-" {
        return None;
    }
    Some(t)
}

/// Exactly 12 ASCII upper-case alphanumerics, a two-letter country prefix and the
/// equity class marker at index 2.
pub fn is_valid_isin(isin: &str) -> bool {
    let b = isin.as_bytes();
    b.len() == ISIN_LEN
        && b.iter()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        && b[0].is_ascii_uppercase()
        && b[1].is_ascii_uppercase()
        && b[2] == EQUITY_CLASS as u8
}

/// Normalize then validate.
pub fn validated_isin(candidate: Option<&str>) -> Option<String> {
    candidate
        .and_then(normalize_isin)
        .filter(|s| is_valid_isin(s))
}
