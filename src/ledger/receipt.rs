//! Receipt numbers and coupon codes.

use chrono::{DateTime, Utc};

use crate::error::{LedgerError, Result};

/// Attempts made to draw an unused identifier before giving up.
const MAX_ATTEMPTS: usize = 5;

/// Random hex digits in a receipt number.
const RECEIPT_SUFFIX_LEN: usize = 8;

/// Random hex digits in a generated coupon code.
const GENERATED_CODE_LEN: usize = 10;

/// Shortest accepted coupon code.
const MIN_CODE_LEN: usize = 4;

/// Longest accepted coupon code.
const MAX_CODE_LEN: usize = 32;

/// Returns `len` upper-case hex digits from a fresh UUID.
fn random_hex(len: usize) -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .to_uppercase()
        .chars()
        .take(len)
        .collect()
}

/// Builds a receipt number of the form `PREFIX-YYYYMMDD-XXXXXXXX`.
pub(crate) fn receipt_number(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{prefix}-{}-{}",
        now.format("%Y%m%d"),
        random_hex(RECEIPT_SUFFIX_LEN)
    )
}

/// Builds a random coupon code.
pub(crate) fn generated_code() -> String {
    random_hex(GENERATED_CODE_LEN)
}

/// Trims and upper-cases a coupon code, then checks its shape.
///
/// Codes are 4 to 32 characters of `A-Z`, `0-9` and `-`.
pub(crate) fn normalize_code(raw: &str) -> Result<String> {
    let code = raw.trim().to_uppercase();
    let len = code.chars().count();
    if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len) {
        return Err(LedgerError::Validation(format!(
            "coupon code must be {MIN_CODE_LEN}-{MAX_CODE_LEN} characters, got {len}"
        )));
    }
    if let Some(bad) = code
        .chars()
        .find(|&ch| !(ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '-'))
    {
        return Err(LedgerError::Validation(format!(
            "coupon code contains invalid character {bad:?}"
        )));
    }
    Ok(code)
}

/// Draws identifiers from `generate` until one is not `taken`.
pub(crate) fn draw_unused<G, T>(mut generate: G, taken: T, what: &str) -> Result<String>
where
    G: FnMut() -> String,
    T: Fn(&str) -> bool,
{
    for _ in 0..MAX_ATTEMPTS {
        let candidate = generate();
        if !taken(&candidate) {
            return Ok(candidate);
        }
        tracing::debug!(%candidate, what, "generated identifier already in use");
    }
    Err(LedgerError::Storage(
        format!("could not generate an unused {what} after {MAX_ATTEMPTS} attempts").into(),
    ))
}
