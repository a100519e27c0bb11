//! Conversions between decimal ether strings and wei-denominated [`Amount`]s.

use crate::ledger::Amount;

pub const WEI_PER_ETHER: Amount = 1_000_000_000_000_000_000;
pub const ETHER_DECIMALS: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount {0:?}")]
    Invalid(String),
    #[error("amount {0:?} has more than 18 decimal places")]
    TooPrecise(String),
    #[error("amount {0:?} is too large")]
    Overflow(String),
}

/// Parses a decimal ether amount such as `"0.5"` or `"12"` into wei.
pub fn parse_ether(input: &str) -> Result<Amount, UnitsError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Invalid(input.to_string()));
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(UnitsError::Invalid(input.to_string()));
    }
    if frac.len() > ETHER_DECIMALS {
        return Err(UnitsError::TooPrecise(input.to_string()));
    }

    let overflow = || UnitsError::Overflow(input.to_string());
    let whole_wei = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<Amount>()
            .map_err(|_| overflow())?
            .checked_mul(WEI_PER_ETHER)
            .ok_or_else(overflow)?
    };
    let frac_wei = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = ETHER_DECIMALS);
        padded.parse::<Amount>().map_err(|_| overflow())?
    };
    whole_wei.checked_add(frac_wei).ok_or_else(overflow)
}

/// Renders wei as a decimal ether string without trailing zeros.
pub fn format_ether(amount: Amount) -> String {
    let whole = amount / WEI_PER_ETHER;
    let frac = amount % WEI_PER_ETHER;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:0>width$}", width = ETHER_DECIMALS);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_amounts() {
        assert_eq!(parse_ether("1").unwrap(), WEI_PER_ETHER);
        assert_eq!(parse_ether("0.5").unwrap(), WEI_PER_ETHER / 2);
        assert_eq!(parse_ether(".25").unwrap(), WEI_PER_ETHER / 4);
        assert_eq!(parse_ether("2.").unwrap(), 2 * WEI_PER_ETHER);
        assert_eq!(parse_ether("0.000000000000000001").unwrap(), 1);
        assert_eq!(parse_ether(" 3.1 ").unwrap(), 3_100_000_000_000_000_000);
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(parse_ether(""), Err(UnitsError::Empty));
        assert!(matches!(parse_ether("."), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_ether("-1"), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_ether("1.2.3"), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_ether("1e3"), Err(UnitsError::Invalid(_))));
        assert!(matches!(
            parse_ether("0.0000000000000000001"),
            Err(UnitsError::TooPrecise(_))
        ));
        assert!(matches!(
            parse_ether("999999999999999999999999999"),
            Err(UnitsError::Overflow(_))
        ));
    }

    #[test]
    fn formats_without_trailing_zeros() {
        assert_eq!(format_ether(0), "0");
        assert_eq!(format_ether(WEI_PER_ETHER), "1");
        assert_eq!(format_ether(WEI_PER_ETHER / 2), "0.5");
        assert_eq!(format_ether(1), "0.000000000000000001");
        assert_eq!(format_ether(12 * WEI_PER_ETHER + WEI_PER_ETHER / 4), "12.25");
    }
}
