//! Conversion between user-entered amount strings and token base units

use crate::error::{BridgeError, BridgeResult};

use ethers::types::U256;
use ethers::utils::{format_units, parse_units};

/// Parse a decimal amount string into base units
pub fn parse_amount(input: &str, decimals: u8) -> BridgeResult<U256> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.starts_with('+') {
        return Err(BridgeError::InvalidAmount(input.to_string()));
    }

    parse_units(trimmed, decimals as u32)
        .map(U256::from)
        .map_err(|_| BridgeError::InvalidAmount(input.to_string()))
}

/// Parse an amount that must be strictly positive
pub fn parse_positive_amount(input: &str, decimals: u8) -> BridgeResult<U256> {
    let amount = parse_amount(input, decimals)?;
    if amount.is_zero() {
        return Err(BridgeError::InvalidAmount(input.to_string()));
    }
    Ok(amount)
}

/// Human-readable amount without trailing zeros
pub fn display_amount(value: U256, decimals: u8) -> String {
    let formatted = match format_units(value, decimals as u32) {
        Ok(s) => s,
        Err(_) => return value.to_string(),
    };

    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

/// Convert base units between two decimal precisions, truncating
pub fn rescale(value: U256, from_decimals: u8, to_decimals: u8) -> BridgeResult<U256> {
    if to_decimals >= from_decimals {
        value
            .checked_mul(U256::exp10((to_decimals - from_decimals) as usize))
            .ok_or_else(|| too_large(value, from_decimals))
    } else {
        Ok(value / U256::exp10((from_decimals - to_decimals) as usize))
    }
}

/// `value + fee`, rejecting totals that do not fit in 256 bits
pub fn checked_total(value: U256, fee: U256, decimals: u8) -> BridgeResult<U256> {
    value
        .checked_add(fee)
        .ok_or_else(|| too_large(value, decimals))
}

/// `value * bps / 10000`, exact for `bps <= 10000` without intermediate overflow
pub fn apply_bps(value: U256, bps: u32) -> U256 {
    let bps = U256::from(bps);
    let scale = U256::from(10_000u32);
    (value / scale)
        .saturating_mul(bps)
        .saturating_add((value % scale) * bps / scale)
}

fn too_large(value: U256, decimals: u8) -> BridgeError {
    BridgeError::InvalidAmount(format!("{} is too large", display_amount(value, decimals)))
}
