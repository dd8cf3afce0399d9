//! Decimal arithmetic utilities for lot and tick rounding.

use rust_decimal::Decimal;

/// Round to tick size (e.g., 0.5 for BTC-PERPETUAL prices).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).round() * tick_size
}

/// Round to the nearest multiple of `lot_size`, ties to even.
pub fn round_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return value;
    }
    (value / lot_size).round() * lot_size
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Round up to lot size.
pub fn round_up_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return value;
    }
    (value / lot_size).ceil() * lot_size
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.01)), dec!(50123.46));
        assert_eq!(round_to_tick(dec!(50123.3), dec!(0.5)), dec!(50123.5));
        assert_eq!(round_to_tick(dec!(50123.2), dec!(0.5)), dec!(50123.0));
        assert_eq!(round_to_tick(dec!(50123.2), Decimal::ZERO), dec!(50123.2));
    }

    #[test]
    fn test_lot_rounding_directions() {
        assert_eq!(round_down_to_lot(dec!(34), dec!(10)), dec!(30));
        assert_eq!(round_up_to_lot(dec!(34), dec!(10)), dec!(40));
        assert_eq!(round_to_lot(dec!(34), dec!(10)), dec!(30));
        assert_eq!(round_to_lot(dec!(36), dec!(10)), dec!(40));
        assert_eq!(round_up_to_lot(dec!(30), dec!(10)), dec!(30));
    }

    #[test]
    fn test_round_to_lot_ties_to_even() {
        assert_eq!(round_to_lot(dec!(25), dec!(10)), dec!(20));
        assert_eq!(round_to_lot(dec!(35), dec!(10)), dec!(40));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(1), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(safe_div(dec!(1), dec!(4)), dec!(0.25));
    }
}
