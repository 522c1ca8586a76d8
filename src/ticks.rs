//! Static classification tables for wire tick-type codes.
//!
//! Every market-data tick arrives with a small integer code. The set of
//! codes is closed and known at build time, so classification is a total
//! `match` per category and an unmapped code is reported as a protocol
//! fault by the caller instead of being silently dropped.
//!
//! The bid/ask/last price and size codes are not listed here because they
//! carry side-specific delta semantics (previous-value shadowing, empty
//! sentinel rewriting) and are matched directly in the quote state.

/// Destination field for a price-style tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceField {
    High,
    Low,
    Close,
    Open,
    Low13Week,
    High13Week,
    Low26Week,
    High26Week,
    Low52Week,
    High52Week,
    AuctionPrice,
    MarkPrice,
    BidYield,
    AskYield,
    LastYield,
}

/// Destination field for a size-style tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeField {
    Volume,
    VolumeRate3Min,
    VolumeRate5Min,
    VolumeRate10Min,
    AvVolume,
    CallOpenInterest,
    PutOpenInterest,
    CallVolume,
    PutVolume,
    AuctionVolume,
    AuctionImbalance,
    RegulatoryImbalance,
    FuturesOpenInterest,
    AvOptionVolume,
    ShortableShares,
}

/// Destination field for a generic numeric tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericField {
    HistVolatility,
    ImpliedVolatility,
    IndexFuturePremium,
    Shortable,
    Halted,
    TradeCount,
    TradeRate,
    VolumeRate,
    RtHistVolatility,
}

/// Destination slot for an option-greeks computation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GreeksField {
    Bid,
    Ask,
    Last,
    Model,
}

/// Classify a price-style tick code.
pub fn price_field(code: i32) -> Option<PriceField> {
    use PriceField::*;
    Some(match code {
        6 | 72 => High,
        7 | 73 => Low,
        9 | 75 => Close,
        14 | 76 => Open,
        15 => Low13Week,
        16 => High13Week,
        17 => Low26Week,
        18 => High26Week,
        19 => Low52Week,
        20 => High52Week,
        35 => AuctionPrice,
        37 => MarkPrice,
        50 | 103 => BidYield,
        51 | 104 => AskYield,
        52 => LastYield,
        _ => return None,
    })
}

/// Classify a size-style tick code.
pub fn size_field(code: i32) -> Option<SizeField> {
    use SizeField::*;
    Some(match code {
        8 | 74 => Volume,
        63 => VolumeRate3Min,
        64 => VolumeRate5Min,
        65 => VolumeRate10Min,
        21 => AvVolume,
        27 => CallOpenInterest,
        28 => PutOpenInterest,
        29 => CallVolume,
        30 => PutVolume,
        34 => AuctionVolume,
        36 => AuctionImbalance,
        61 => RegulatoryImbalance,
        86 => FuturesOpenInterest,
        87 => AvOptionVolume,
        89 => ShortableShares,
        _ => return None,
    })
}

/// Classify a generic numeric tick code.
pub fn generic_field(code: i32) -> Option<GenericField> {
    use GenericField::*;
    Some(match code {
        23 => HistVolatility,
        24 => ImpliedVolatility,
        31 => IndexFuturePremium,
        46 => Shortable,
        49 => Halted,
        54 => TradeCount,
        55 => TradeRate,
        56 => VolumeRate,
        58 => RtHistVolatility,
        _ => return None,
    })
}

/// Classify an option-computation tick code.
pub fn greeks_field(code: i32) -> Option<GreeksField> {
    use GreeksField::*;
    Some(match code {
        10 | 80 => Bid,
        11 | 81 => Ask,
        12 | 82 => Last,
        13 | 83 => Model,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_codes_closed_set() {
        let mapped = [
            6, 72, 7, 73, 9, 75, 14, 76, 15, 16, 17, 18, 19, 20, 35, 37, 50, 103, 51, 104, 52,
        ];
        for code in mapped {
            assert!(price_field(code).is_some(), "code {code} should map");
        }
        assert!(price_field(1).is_none());
        assert!(price_field(999).is_none());
    }

    #[test]
    fn test_duplicate_codes_map_to_same_field() {
        assert_eq!(price_field(6), price_field(72));
        assert_eq!(size_field(8), size_field(74));
        assert_eq!(greeks_field(10), greeks_field(80));
    }

    #[test]
    fn test_category_tables_are_disjoint() {
        for code in 0..200 {
            let hits = [
                price_field(code).is_some(),
                size_field(code).is_some(),
                generic_field(code).is_some(),
                greeks_field(code).is_some(),
            ]
            .iter()
            .filter(|h| **h)
            .count();
            assert!(hits <= 1, "code {code} maps in {hits} categories");
        }
    }

    #[test]
    fn test_greeks_codes() {
        assert_eq!(greeks_field(13), Some(GreeksField::Model));
        assert_eq!(greeks_field(82), Some(GreeksField::Last));
        assert!(greeks_field(14).is_none());
    }
}
