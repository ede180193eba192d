//! Ethereum value helpers.
//!
//! Address constants, wei/ether conversion and the fixed-width UTC timestamp
//! format used by stored transaction records.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};

/// The well-known zero address; transfers from it are mints, transfers to it are burns.
pub const ZERO_ADDRESS: Address = Address::ZERO;

/// Wei per ether (10^18).
const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Layout of `time` and `pushedToDb`, e.g. `Tue, 06 Jun 2023 00:00:23 UTC`.
pub const RECORD_TIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S UTC";

/// Convert a wei amount into an ether decimal string.
///
/// Trailing fractional zeros are dropped, so `1.5 ether` renders as `"1.5"`
/// and zero renders as `"0"`.
pub fn format_ether(wei: U256) -> String {
    let unit = U256::from(WEI_PER_ETHER);
    let whole = wei / unit;
    let fraction = wei % unit;

    if fraction.is_zero() {
        return whole.to_string();
    }

    let digits = format!("{:0>18}", fraction.to_string());
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Format a unix timestamp (seconds) in the record time layout.
pub fn format_unix_timestamp(seconds: u64) -> Option<String> {
    let seconds = i64::try_from(seconds).ok()?;
    DateTime::<Utc>::from_timestamp(seconds, 0).map(|dt| format_utc(&dt))
}

/// Format a UTC instant in the record time layout.
pub fn format_utc(instant: &DateTime<Utc>) -> String {
    instant.format(RECORD_TIME_FORMAT).to_string()
}

/// Saturating conversion used for gas prices, which the store keeps as 64-bit integers.
pub fn saturating_u64(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Check if address is the zero address
pub fn is_zero(address: &Address) -> bool {
    *address == ZERO_ADDRESS
}
