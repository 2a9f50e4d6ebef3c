//! Hex and fixed-point codecs for chain-native encodings.
//!
//! EVM nodes encode quantities as `0x`-prefixed hex strings and token
//! amounts as integers in base units. Everything entering the system is
//! converted here so the rest of the crate never deals with raw hex.

use super::ChainError;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use time::OffsetDateTime;

/// Decimals of the chain's native currency (wei per ether).
pub const NATIVE_DECIMALS: u32 = 18;

/// `balanceOf(address)` selector.
pub const BALANCE_OF_SELECTOR: &str = "0x70a08231";

fn strip_hex_prefix(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

/// Parse a hex quantity into an unsigned integer.
///
/// Leading zeros are ignored, so 32-byte words such as log `data` decode
/// as long as the value fits in 128 bits. `"0x"` decodes as zero.
pub fn parse_quantity(raw: &str) -> Result<u128, ChainError> {
    let digits = strip_hex_prefix(raw).trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 32 {
        return Err(ChainError::Decode(format!("quantity overflows 128 bits: {raw}")));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("invalid hex quantity {raw}: {e}")))
}

pub fn parse_u64(raw: &str) -> Result<u64, ChainError> {
    let value = parse_quantity(raw)?;
    u64::try_from(value).map_err(|_| ChainError::Decode(format!("quantity overflows 64 bits: {raw}")))
}

pub fn encode_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Scale an integer amount of base units down by `10^decimals`.
pub fn units_to_decimal(units: u128, decimals: u32) -> Result<Decimal, ChainError> {
    let units = i128::try_from(units)
        .map_err(|_| ChainError::Decode(format!("amount out of range: {units}")))?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .map(|d| d.normalize())
        .map_err(|e| ChainError::Decode(format!("amount out of range: {units}: {e}")))
}

/// Canonical form of an address: `0x` followed by 40 lowercase hex digits.
///
/// Shorter inputs are left-padded with zeros.
pub fn normalize_address(raw: &str) -> Result<String, ChainError> {
    let digits = strip_hex_prefix(raw);
    if digits.is_empty()
        || digits.len() > 40
        || !digits.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(ChainError::InvalidAddress(raw.to_string()));
    }
    Ok(format!("0x{:0>40}", digits.to_ascii_lowercase()))
}

/// Left-pad an address to a 32-byte topic.
pub fn address_to_topic(address: &str) -> Result<String, ChainError> {
    let address = normalize_address(address)?;
    Ok(format!("0x{:0>64}", &address[2..]))
}

/// Take the low 20 bytes of a 32-byte topic as an address.
pub fn topic_to_address(topic: &str) -> Result<String, ChainError> {
    let digits = strip_hex_prefix(topic);
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainError::Decode(format!("invalid address topic: {topic}")));
    }
    Ok(format!("0x{}", digits[24..].to_ascii_lowercase()))
}

/// Calldata for `balanceOf(address)`.
pub fn balance_of_calldata(address: &str) -> Result<String, ChainError> {
    let topic = address_to_topic(address)?;
    Ok(format!("{BALANCE_OF_SELECTOR}{}", &topic[2..]))
}

// -- serde field helpers -----------------------------------------------------
//
// Every helper accepts a missing or `null` field as `None`.

fn decode_with<'de, D, T>(
    deserializer: D,
    decode: impl FnOnce(&str) -> Result<T, ChainError>,
) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.as_deref()
        .map(decode)
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// Hex integer fields (`nonce`, `gas`, `blockNumber`, ...).
pub(crate) fn hex_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    decode_with(deserializer, parse_u64)
}

/// Native-currency amounts (`value`, `gasPrice`) in ether.
pub(crate) fn hex_native_amount<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    decode_with(deserializer, |raw| {
        units_to_decimal(parse_quantity(raw)?, NATIVE_DECIMALS)
    })
}

/// Address fields compared across the system (`from`, `to`).
pub(crate) fn lowercase_address<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    decode_with(deserializer, |raw| Ok(raw.to_ascii_lowercase()))
}

/// Receipt `status`: `true` iff the raw value is `0x1`.
pub(crate) fn status_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    decode_with(deserializer, |raw| Ok(raw == "0x1"))
}

/// Block `timestamp` in epoch seconds.
pub(crate) fn hex_timestamp<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    decode_with(deserializer, |raw| {
        let secs = i64::try_from(parse_u64(raw)?)
            .map_err(|_| ChainError::Decode(format!("timestamp out of range: {raw}")))?;
        OffsetDateTime::from_unix_timestamp(secs)
            .map_err(|e| ChainError::Decode(format!("timestamp out of range: {raw}: {e}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0xa").unwrap(), 10);
        assert_eq!(parse_quantity("0x9cd2").unwrap(), 40146);
        assert_eq!(
            parse_quantity("0x000000000000000000000000000000000000000000000000000000003b9aca00")
                .unwrap(),
            1_000_000_000
        );
        assert!(parse_quantity("0xzz").is_err());
        assert!(parse_quantity(&format!("0x1{}", "0".repeat(32))).is_err());
    }

    #[test]
    fn test_units_to_decimal() {
        assert_eq!(
            units_to_decimal(150_000_000, 8).unwrap(),
            Decimal::new(15, 1)
        );
        assert_eq!(
            units_to_decimal(1_000_000_000_000_000_000, NATIVE_DECIMALS).unwrap(),
            Decimal::ONE
        );
        assert_eq!(units_to_decimal(0, 8).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_address_topics() {
        let address = "0xB6ED7644C69416D67B522E20BC294A9A9B405B31";
        let topic = address_to_topic(address).unwrap();
        assert_eq!(
            topic,
            "0x000000000000000000000000b6ed7644c69416d67b522e20bc294a9a9b405b31"
        );
        assert_eq!(
            topic_to_address(&topic).unwrap(),
            "0xb6ed7644c69416d67b522e20bc294a9a9b405b31"
        );
        assert!(topic_to_address("0x1234").is_err());
        assert!(normalize_address("0xnot-an-address").is_err());
        assert_eq!(normalize_address("0x1").unwrap(), format!("0x{}1", "0".repeat(39)));
    }

    #[test]
    fn test_balance_of_calldata() {
        let data = balance_of_calldata("0x00000000000000000000000000000000000000ff").unwrap();
        assert_eq!(
            data,
            "0x70a0823100000000000000000000000000000000000000000000000000000000000000ff"
        );
    }
}
