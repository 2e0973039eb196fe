use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One observation of the quoted price
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub captured_at: DateTime<Utc>,
    pub price: Decimal,
}

/// One observation of account equity plus the side of the open position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquitySample {
    pub captured_at: DateTime<Utc>,
    pub equity: Decimal,
    pub position: Position,
}

/// Side of the currently open position on the tracked symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Position {
    Buy,
    Sell,
    #[default]
    #[serde(rename = "No Position")]
    NoPosition,
}

impl Position {
    /// Label used in the database and on the dashboard
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Buy => "Buy",
            Position::Sell => "Sell",
            Position::NoPosition => "No Position",
        }
    }

    /// Indicator colour shown next to the position label
    pub fn color(&self) -> &'static str {
        match self {
            Position::Buy => "#00aa00",
            Position::Sell => "#aa0000",
            Position::NoPosition => "#999999",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buy" => Ok(Position::Buy),
            "Sell" => Ok(Position::Sell),
            "No Position" => Ok(Position::NoPosition),
            other => Err(format!("unknown position label: {other}")),
        }
    }
}

/// Exchange candle as returned by the price source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Open/high/low/close summary of the price samples in one bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OhlcBucket {
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_labels_round_trip() {
        for position in [Position::Buy, Position::Sell, Position::NoPosition] {
            assert_eq!(position.as_str().parse::<Position>().unwrap(), position);
        }
    }

    #[test]
    fn test_unknown_position_label() {
        assert!("Flat".parse::<Position>().is_err());
    }

    #[test]
    fn test_position_serializes_as_label() {
        let json = serde_json::to_string(&Position::NoPosition).unwrap();
        assert_eq!(json, "\"No Position\"");
        assert_eq!(Position::default(), Position::NoPosition);
    }

    #[test]
    fn test_position_colors() {
        assert_eq!(Position::Buy.color(), "#00aa00");
        assert_eq!(Position::Sell.color(), "#aa0000");
        assert_eq!(Position::NoPosition.color(), "#999999");
    }
}
