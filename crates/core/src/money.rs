//! Monetary rounding and lenient amount parsing.
//!
//! All monetary values are `rust_decimal::Decimal`, rounded to 2 decimal
//! places with half-away-from-zero midpoint handling. The same strategy is
//! applied to every intermediate running total during reconciliation so the
//! result never depends on summation order.

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

/// Decimal places kept on every stored monetary value.
pub const MONEY_SCALE: u32 = 2;

/// Rounds to 2 decimal places, half away from zero (150.005 -> 150.01).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Parses an amount field from a raw document.
///
/// Hosted-database documents carry amounts either as JSON numbers or as
/// strings, depending on which client version wrote them. Both shapes parse
/// through here; anything else is `None` and the caller decides whether that
/// makes the record malformed.
pub fn parse_money(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// A monetary value as it is written into documents.
pub fn to_json(value: Decimal) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Parses a required non-negative magnitude, rounded to scale.
pub fn parse_magnitude(value: &Value) -> Option<Decimal> {
    let amount = parse_money(value)?;
    if amount.is_sign_negative() {
        return None;
    }
    Some(round_money(amount))
}
