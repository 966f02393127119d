//! Currency normalization: short symbolic names map to canonical mint
//! addresses, anything unknown and short falls back to native SOL.

/// Canonical wrapped-SOL mint, standing in for the native coin.
pub const SOL: &str = "So11111111111111111111111111111111111111112";
/// USD Coin mint.
pub const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// Tether mint.
pub const USDT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

/// Resolves a currency string to a mint address.
///
/// Empty input takes `fallback` first. Known symbols (`SOL`, `USDC`,
/// `USDT`, case-insensitive) resolve through the fixed table; anything
/// else shorter than a plausible base58 address falls back to SOL; longer
/// strings are taken as literal mint addresses.
#[must_use]
pub fn mint_address(currency: &str, fallback: &str) -> String {
    let currency = if currency.is_empty() { fallback } else { currency };
    match currency.to_uppercase().as_str() {
        "SOL" => return SOL.to_owned(),
        "USDC" => return USDC.to_owned(),
        "USDT" => return USDT.to_owned(),
        _ => {}
    }
    if currency.len() < 40 {
        return SOL.to_owned();
    }
    currency.to_owned()
}

/// Whether the currency denotes the native coin.
#[must_use]
pub fn is_sol(currency: &str) -> bool {
    currency.eq_ignore_ascii_case("SOL") || currency == SOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_resolve_through_the_table() {
        assert_eq!(mint_address("USDC", ""), USDC);
        assert_eq!(mint_address("usdt", ""), USDT);
        assert_eq!(mint_address("SOL", ""), SOL);
    }

    #[test]
    fn empty_takes_fallback() {
        assert_eq!(mint_address("", "USDC"), USDC);
        assert_eq!(mint_address("", USDC), USDC);
    }

    #[test]
    fn unknown_short_strings_fall_back_to_sol() {
        assert_eq!(mint_address("DOGE", ""), SOL);
        assert_eq!(mint_address("x", ""), SOL);
    }

    #[test]
    fn full_addresses_pass_through() {
        let mint = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
        assert_eq!(mint_address(mint, ""), mint);
    }

    #[test]
    fn sol_detection() {
        assert!(is_sol("SOL"));
        assert!(is_sol("sol"));
        assert!(is_sol(SOL));
        assert!(!is_sol(USDC));
    }
}
