use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Side of a posting. Credits add to a balance, debits subtract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }

    /// Parse the wire form. Only the exact lowercase tokens are accepted;
    /// anything else is the caller's error, not a normalization case.
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "debit" => Ok(Direction::Debit),
            "credit" => Ok(Direction::Credit),
            other => Err(LedgerError::InvalidDirection {
                value: other.to_string(),
            }),
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One leg of a transaction as supplied by the caller, strings verbatim.
///
/// The draft is what gets recorded in the event payload; validation produces
/// the typed [`Posting`] alongside it without rewriting the original values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingDraft {
    pub account_code: String,
    pub direction: String,
    pub amount: String,
}

/// A validated posting: direction parsed, amount an exact positive decimal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub account_code: String,
    pub direction: Direction,
    pub amount: Decimal,
}

/// Maximum fractional digits the store preserves (NUMERIC(38,10) columns).
pub(crate) const MAX_SCALE: u32 = 10;

pub(crate) fn parse_amount(raw: &str) -> Result<Decimal, LedgerError> {
    let value = Decimal::from_str_exact(raw).map_err(|e| LedgerError::InvalidAmount {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;

    if value <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            value: raw.to_string(),
            reason: "amount must be positive".to_string(),
        });
    }

    // More fractional digits than the store keeps would round silently and
    // break the balance law; reject at admission instead.
    if value.scale() > MAX_SCALE {
        return Err(LedgerError::InvalidAmount {
            value: raw.to_string(),
            reason: format!("at most {MAX_SCALE} fractional digits are supported"),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_only_accepts_exact_tokens() {
        assert_eq!(Direction::parse("debit").unwrap(), Direction::Debit);
        assert_eq!(Direction::parse("credit").unwrap(), Direction::Credit);
        for bad in ["Debit", "CREDIT", "dr", ""] {
            assert!(matches!(
                Direction::parse(bad),
                Err(LedgerError::InvalidDirection { .. })
            ));
        }
    }

    #[test]
    fn amounts_parse_exactly() {
        assert_eq!(parse_amount("100.00").unwrap().to_string(), "100.00");
        assert_eq!(
            parse_amount("0.0000000001").unwrap(),
            Decimal::new(1, 10)
        );
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        for bad in ["0", "0.00", "-1", "-0.01"] {
            assert!(matches!(
                parse_amount(bad),
                Err(LedgerError::InvalidAmount { .. })
            ));
        }
    }

    #[test]
    fn malformed_amounts_are_rejected() {
        for bad in ["", "abc", "1.2.3", "1e5", "NaN"] {
            assert!(matches!(
                parse_amount(bad),
                Err(LedgerError::InvalidAmount { .. })
            ));
        }
    }

    #[test]
    fn excess_scale_is_rejected() {
        assert!(matches!(
            parse_amount("1.00000000001"),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }
}
