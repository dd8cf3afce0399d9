//! Pure market arithmetic shared by the controller and the boundary planner.

use crate::exchange::MarketInfo;
use crate::utils::safe_div;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Lot size assumed when the exchange reports no minimum amount.
pub const FALLBACK_LOT_SIZE: Decimal = dec!(10);

/// Minimum order increment of the instrument.
pub fn lot_size(market: Option<&MarketInfo>) -> Decimal {
    market
        .and_then(|m| m.min_amount)
        .filter(|lot| *lot > Decimal::ZERO)
        .unwrap_or(FALLBACK_LOT_SIZE)
}

/// `(current_short - desired_short) / total_value`, zero for an empty portfolio.
pub fn deviation(current_short: Decimal, desired_short: Decimal, total_value: Decimal) -> Decimal {
    safe_div(current_short - desired_short, total_value)
}

/// Fractional price moves `(down_pct, up_pct)` at which the short leaves the
/// tolerance band again.
///
/// Requires `(1 - ratio) > gap`; see [`crate::config::BotConfig::validate`].
pub fn boundary_offsets(gap: Decimal, ratio: Decimal) -> (Decimal, Decimal) {
    let free = Decimal::ONE - ratio;
    let up_pct = gap / (free - gap);
    let down_pct = -gap / (free + gap);
    (down_pct, up_pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lot_size_fallback() {
        let mut market = MarketInfo {
            is_contract: true,
            settle_asset: "BTC".to_string(),
            is_swap: true,
            min_amount: Some(dec!(1)),
            tick_size: None,
        };
        assert_eq!(lot_size(Some(&market)), dec!(1));

        market.min_amount = None;
        assert_eq!(lot_size(Some(&market)), FALLBACK_LOT_SIZE);
        market.min_amount = Some(Decimal::ZERO);
        assert_eq!(lot_size(Some(&market)), FALLBACK_LOT_SIZE);
        assert_eq!(lot_size(None), FALLBACK_LOT_SIZE);
    }

    #[test]
    fn test_deviation() {
        assert_eq!(deviation(dec!(25000), dec!(25000), dec!(50000)), Decimal::ZERO);
        assert_eq!(deviation(dec!(24000), dec!(25000), dec!(50000)), dec!(-0.02));
        assert_eq!(deviation(dec!(100), dec!(5), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_boundary_offsets_straddle_price() {
        for (gap, ratio) in [
            (dec!(0.01), dec!(0.5)),
            (dec!(0.05), dec!(0.05)),
            (dec!(0.02), dec!(0.95)),
            (dec!(0.3), dec!(0.6)),
        ] {
            let (down, up) = boundary_offsets(gap, ratio);
            assert!(down < Decimal::ZERO, "down {} for gap {} ratio {}", down, gap, ratio);
            assert!(up > Decimal::ZERO, "up {} for gap {} ratio {}", up, gap, ratio);
        }

        let (down, up) = boundary_offsets(dec!(0.01), dec!(0.5));
        assert_eq!(up.round_dp(6), dec!(0.020408));
        assert_eq!(down.round_dp(6), dec!(-0.019608));
    }

    #[test]
    fn test_boundary_offsets_small_gap_limit() {
        let gap = dec!(0.0001);
        let ratio = dec!(0.5);
        let limit = gap / (Decimal::ONE - ratio);
        let (down, up) = boundary_offsets(gap, ratio);

        assert!(((up - limit) / limit).abs() < dec!(0.001));
        assert!(((down.abs() - limit) / limit).abs() < dec!(0.001));
    }
}
