//! Conversion between a chain's smallest unit and decimal display
//! strings.
//!
//! The wallet document stores amounts in the smallest unit; the balance
//! cache and user surfaces carry decimal strings. Conversions are exact
//! string arithmetic, never floating point.

use crate::chain::Chain;

/// Format an amount of the smallest unit as a decimal string with the
/// chain's full precision, e.g. `6000` sat → `"0.00006000"`.
pub fn format_units(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let divisor = 10u64.checked_pow(decimals as u32);
    match divisor {
        Some(div) => {
            let whole = amount / div;
            let frac = amount % div;
            format!("{whole}.{frac:0width$}", width = decimals as usize)
        }
        // 10^20 and up do not fit in u64; split on the string form.
        None => {
            let digits = amount.to_string();
            let decimals = decimals as usize;
            if digits.len() > decimals {
                let (whole, frac) = digits.split_at(digits.len() - decimals);
                format!("{whole}.{frac}")
            } else {
                format!("0.{digits:0>width$}", width = decimals)
            }
        }
    }
}

/// Format a smallest-unit amount using the chain's precision.
pub fn format_chain_amount(chain: Chain, amount: u64) -> String {
    format_units(amount, chain.decimals())
}

/// Parse a decimal display string into the smallest unit.
///
/// Accepts an optional fractional part up to `decimals` digits. Returns
/// `None` for malformed input, too much precision, or overflow.
pub fn parse_units(s: &str, decimals: u8) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (whole_str, frac_str) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole_str.is_empty() && frac_str.is_empty() {
        return None;
    }
    if frac_str.len() > decimals as usize {
        return None;
    }
    if !whole_str.chars().all(|c| c.is_ascii_digit())
        || !frac_str.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let scale = 10u64.checked_pow(decimals as u32)?;
    let whole: u64 = if whole_str.is_empty() {
        0
    } else {
        whole_str.parse().ok()?
    };

    let mut frac: u64 = 0;
    if !frac_str.is_empty() {
        frac = frac_str.parse().ok()?;
        frac = frac.checked_mul(10u64.pow((decimals as usize - frac_str.len()) as u32))?;
    }

    whole.checked_mul(scale)?.checked_add(frac)
}
