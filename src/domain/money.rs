use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Money is a fixed-point decimal. Rounding happens only at output boundaries.
pub type Amount = Decimal;

/// Currencies an account can be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Usd, Currency::Eur];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }
}

impl FromStr for Currency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            _ => Err(ParseEnumError::new("currency", s)),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rate to multiply an EUR amount by to get USD.
pub const EUR_TO_USD: Decimal = dec!(1.1);
/// Rate to multiply a USD amount by to get EUR.
pub const USD_TO_EUR: Decimal = dec!(0.91);

/// Static conversion rate between two currencies. Identity when they match.
pub fn exchange_rate(from: Currency, to: Currency) -> Decimal {
    match (from, to) {
        (Currency::Eur, Currency::Usd) => EUR_TO_USD,
        (Currency::Usd, Currency::Eur) => USD_TO_EUR,
        _ => Decimal::ONE,
    }
}

/// Convert an amount using the static exchange table. Not rounded.
pub fn convert(amount: Amount, from: Currency, to: Currency) -> Amount {
    amount.saturating_mul(exchange_rate(from, to))
}

/// `part` as a percentage of `whole` (non-zero). Saturates instead of overflowing.
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    match part.checked_div(whole) {
        Some(ratio) => ratio.saturating_mul(Decimal::ONE_HUNDRED),
        None if part.is_sign_negative() != whole.is_sign_negative() => Decimal::MIN,
        None => Decimal::MAX,
    }
}

/// Round to cents, halves going up: 1.005 -> 1.01, -1.005 -> -1.00.
pub fn round2(value: Decimal) -> Decimal {
    let strategy = if value.is_sign_negative() {
        RoundingStrategy::MidpointTowardZero
    } else {
        RoundingStrategy::MidpointAwayFromZero
    };
    let mut rounded = value.round_dp_with_strategy(2, strategy);
    // no "-0.00"
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded
}

/// Format an amount with exactly two decimals.
/// Example: 50 -> "50.00", -12.345 -> "-12.34"
pub fn format_amount(value: Amount) -> String {
    let mut rounded = round2(value);
    rounded.rescale(2);
    rounded.to_string()
}

/// Parse a user-entered amount. Accepts a comma as decimal separator and
/// ignores spaces used as thousands separators.
/// Example: "50" -> 50, "1 234,5" -> 1234.5
pub fn parse_amount(input: &str) -> Result<Amount, ParseAmountError> {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if cleaned.is_empty() {
        return Err(ParseAmountError::Empty);
    }

    Decimal::from_str(&cleaned).map_err(|_| ParseAmountError::InvalidFormat(input.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    Empty,
    InvalidFormat(String),
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::Empty => write!(f, "empty amount"),
            ParseAmountError::InvalidFormat(s) => write!(f, "invalid amount format: '{}'", s),
        }
    }
}

impl std::error::Error for ParseAmountError {}

/// Error for string-to-enum parsing of the domain's closed sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}
