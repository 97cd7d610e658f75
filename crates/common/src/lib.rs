use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub type Address = [u8; 20];

pub const WEI_PER_NATIVE: u128 = 1_000_000_000_000_000_000;

/// Label for the chain a deployment serves, e.g. "andechain-testnet".
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ChainKey(pub String);

impl ChainKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl Display for ChainKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders a wei amount in native units with trailing zeros trimmed.
pub fn format_native(amount_wei: u128) -> String {
    let whole = amount_wei / WEI_PER_NATIVE;
    let frac = amount_wei % WEI_PER_NATIVE;
    if frac == 0 {
        return whole.to_string();
    }
    let mut digits = format!("{frac:018}");
    while digits.ends_with('0') {
        digits.pop();
    }
    format!("{whole}.{digits}")
}

pub fn round_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn parse_address(value: &str) -> Option<Address> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.len() != 40 || !digits.is_ascii() {
        return None;
    }
    let mut out = [0u8; 20];
    for index in (0..digits.len()).step_by(2) {
        out[index / 2] = u8::from_str_radix(&digits[index..index + 2], 16).ok()?;
    }
    Some(out)
}

pub fn format_address(address: &Address) -> String {
    let mut out = String::from("0x");
    for byte in address {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{
        format_address, format_native, parse_address, round_two_decimals, ChainKey, WEI_PER_NATIVE,
    };

    #[test]
    fn chain_key_display_matches_inner_value() {
        let key = ChainKey::new("andechain-testnet");
        assert_eq!(key.to_string(), "andechain-testnet");
    }

    #[test]
    fn format_native_trims_trailing_zeros() {
        assert_eq!(format_native(0), "0");
        assert_eq!(format_native(WEI_PER_NATIVE), "1");
        assert_eq!(format_native(10_000_000_000_000_000), "0.01");
        assert_eq!(format_native(25_200_000_000_000), "0.0000252");
        assert_eq!(format_native(WEI_PER_NATIVE * 3 / 2), "1.5");
    }

    #[test]
    fn round_two_decimals_matches_display_precision() {
        assert_eq!(round_two_decimals(0.5049), 0.5);
        assert_eq!(round_two_decimals(10.005), 10.01);
        assert_eq!(round_two_decimals(0.0), 0.0);
    }

    #[test]
    fn parse_address_round_trips_with_and_without_prefix() {
        let formatted = "0x00112233445566778899aabbccddeeff00112233";
        let parsed = parse_address(formatted).expect("valid address");
        assert_eq!(format_address(&parsed), formatted);
        assert_eq!(parse_address(&formatted[2..]), Some(parsed));
    }

    #[test]
    fn parse_address_rejects_bad_lengths_and_digits() {
        assert!(parse_address("0x1234").is_none());
        assert!(parse_address("").is_none());
        assert!(parse_address("0xzz112233445566778899aabbccddeeff00112233").is_none());
    }
}
