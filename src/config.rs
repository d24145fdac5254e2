//! Ledger configuration.
//!
//! Values come from code ([`LedgerConfig::default`] plus the `with_*`
//! setters) or from the environment via [`LedgerConfig::from_env`].

use crate::error::{LedgerError, Result};

/// Months a collected deposit stays locked by default.
pub const DEFAULT_MATURITY_MONTHS: u32 = 3;

/// Receipt number prefix used by default.
pub const DEFAULT_RECEIPT_PREFIX: &str = "RCP";

/// Environment variable overriding [`LedgerConfig::maturity_months`].
pub const MATURITY_MONTHS_VAR: &str = "LEDGER_MATURITY_MONTHS";

/// Environment variable overriding [`LedgerConfig::receipt_prefix`].
pub const RECEIPT_PREFIX_VAR: &str = "LEDGER_RECEIPT_PREFIX";

/// Longest maturity period accepted (ten years).
const MAX_MATURITY_MONTHS: u32 = 120;

/// Longest receipt prefix accepted.
const MAX_PREFIX_LEN: usize = 8;

/// Tunable ledger rules.
///
/// # Examples
///
/// ```
/// use marketplace_ledger::config::LedgerConfig;
///
/// let config = LedgerConfig::default()
///     .with_maturity_months(6)
///     .with_receipt_prefix("DEP");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Months between deposit collection and maturity.
    pub maturity_months: u32,
    /// Prefix of generated receipt numbers.
    pub receipt_prefix: String,
}

impl Default for LedgerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            maturity_months: DEFAULT_MATURITY_MONTHS,
            receipt_prefix: DEFAULT_RECEIPT_PREFIX.to_owned(),
        }
    }
}

impl LedgerConfig {
    /// Sets the maturity period in months.
    #[inline]
    #[must_use]
    pub const fn with_maturity_months(mut self, months: u32) -> Self {
        self.maturity_months = months;
        self
    }

    /// Sets the receipt number prefix.
    #[inline]
    #[must_use]
    pub fn with_receipt_prefix<T: Into<String>>(mut self, prefix: T) -> Self {
        self.receipt_prefix = prefix.into();
        self
    }

    /// Reads overrides from `LEDGER_MATURITY_MONTHS` and
    /// `LEDGER_RECEIPT_PREFIX`; unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Config`] if a variable is malformed or the
    /// resulting configuration fails [`Self::validate`].
    #[inline]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(MATURITY_MONTHS_VAR) {
            config.maturity_months = raw.trim().parse().map_err(|err| {
                LedgerError::Config(format!("{MATURITY_MONTHS_VAR}={raw:?}: {err}"))
            })?;
        }
        if let Some(raw) = lookup(RECEIPT_PREFIX_VAR) {
            config.receipt_prefix = raw.trim().to_uppercase();
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is within range.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Config`] describing the first bad value.
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.maturity_months == 0 || self.maturity_months > MAX_MATURITY_MONTHS {
            return Err(LedgerError::Config(format!(
                "maturity must be between 1 and {MAX_MATURITY_MONTHS} months, got {}",
                self.maturity_months
            )));
        }
        let prefix_ok = !self.receipt_prefix.is_empty()
            && self.receipt_prefix.len() <= MAX_PREFIX_LEN
            && self
                .receipt_prefix
                .chars()
                .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit());
        if !prefix_ok {
            return Err(LedgerError::Config(format!(
                "receipt prefix must be 1-{MAX_PREFIX_LEN} upper-case letters or digits, got {:?}",
                self.receipt_prefix
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'pairs>(
        pairs: &'pairs [(&'pairs str, &'pairs str)],
    ) -> impl Fn(&str) -> Option<String> + 'pairs {
        move |key| {
            pairs
                .iter()
                .find(|&&(name, _)| name == key)
                .map(|&(_, value)| value.to_owned())
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = LedgerConfig::default();
        assert_eq!(config.maturity_months, 3);
        assert_eq!(config.receipt_prefix, "RCP");
        config.validate().unwrap();
    }

    #[test]
    fn empty_environment_keeps_defaults() {
        let config = LedgerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn environment_overrides_apply() {
        let config = LedgerConfig::from_lookup(lookup_from(&[
            (MATURITY_MONTHS_VAR, " 6 "),
            (RECEIPT_PREFIX_VAR, "dep"),
        ]))
        .unwrap();
        assert_eq!(config.maturity_months, 6);
        assert_eq!(config.receipt_prefix, "DEP");
    }

    #[test]
    fn malformed_months_is_a_config_error() {
        let err = LedgerConfig::from_lookup(lookup_from(&[(MATURITY_MONTHS_VAR, "three")]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
        assert!(err.to_string().contains(MATURITY_MONTHS_VAR));
    }

    #[test]
    fn zero_months_is_rejected() {
        let err = LedgerConfig::default()
            .with_maturity_months(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn prefix_must_be_upper_alphanumeric() {
        assert!(
            LedgerConfig::default()
                .with_receipt_prefix("R-1")
                .validate()
                .is_err()
        );
        assert!(
            LedgerConfig::default()
                .with_receipt_prefix("")
                .validate()
                .is_err()
        );
        LedgerConfig::default()
            .with_receipt_prefix("SHOP24")
            .validate()
            .unwrap();
    }
}
