//! Raw row shapes as the venue and the history service deliver them.
//!
//! The two sources name their fields differently and stamp naive,
//! exchange-local datetimes. Both normalize into [`Bar`] before any feed
//! logic runs; the configured venue UTC offset resolves the naive times.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Bar, InstrumentId, Price, Quantity};

/// One row of a historical backfill batch.
///
/// The batch source names the instrument explicitly per row and uses its own
/// column names (`OpenPrice`, `LastPrice`, `BarVolume`, `hold`).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HistoryRow {
    #[serde(rename = "InstrumentID")]
    pub instrument: String,
    #[serde(rename = "DateTime")]
    pub datetime: NaiveDateTime,
    #[serde(rename = "OpenPrice")]
    pub open: Price,
    #[serde(rename = "HighPrice")]
    pub high: Price,
    #[serde(rename = "LowPrice")]
    pub low: Price,
    #[serde(rename = "LastPrice")]
    pub close: Price,
    #[serde(rename = "BarVolume")]
    pub volume: Quantity,
    #[serde(rename = "hold", default)]
    pub open_interest: Quantity,
}

impl HistoryRow {
    /// Normalize into the common bar shape.
    #[must_use]
    pub fn into_bar(self, offset: FixedOffset) -> Bar {
        Bar {
            instrument: InstrumentId::from(self.instrument),
            timestamp: localize(self.datetime, offset),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            open_interest: self.open_interest,
        }
    }
}

/// One finished bar pushed over the live connection.
///
/// Live frames carry both the full routing identifier (`local_symbol`,
/// `code.VENUE`) and the bare contract code the venue echoes back; feeds
/// filter on the bare code.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LiveBarFrame {
    pub local_symbol: String,
    pub symbol: String,
    pub datetime: NaiveDateTime,
    pub open_price: Price,
    pub high_price: Price,
    pub low_price: Price,
    pub close_price: Price,
    pub volume: Quantity,
    #[serde(default)]
    pub open_interest: Quantity,
}

impl LiveBarFrame {
    /// The instrument this frame should be routed to.
    #[must_use]
    pub fn routing_key(&self) -> InstrumentId {
        InstrumentId::from(self.local_symbol.as_str())
    }

    /// Normalize into the common bar shape.
    #[must_use]
    pub fn into_bar(self, offset: FixedOffset) -> Bar {
        Bar {
            instrument: InstrumentId::from(self.local_symbol),
            timestamp: localize(self.datetime, offset),
            open: self.open_price,
            high: self.high_price,
            low: self.low_price,
            close: self.close_price,
            volume: self.volume,
            open_interest: self.open_interest,
        }
    }
}

/// Resolve a naive exchange-local datetime against the venue offset.
#[must_use]
pub fn localize(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    naive
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        // A fixed offset maps every local time uniquely.
        .unwrap_or_else(|| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// The `+08:00` offset most mainland futures venues stamp bars with.
#[must_use]
pub fn default_venue_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn naive(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn history_row_parses_venue_column_names() {
        let row: HistoryRow = serde_json::from_str(
            r#"{
                "InstrumentID": "rb2110.SHFE",
                "DateTime": "2021-06-15T09:01:00",
                "OpenPrice": "5105",
                "HighPrice": "5112",
                "LowPrice": "5101",
                "LastPrice": "5110",
                "BarVolume": "1834",
                "hold": "120533"
            }"#,
        )
        .expect("row should parse");
        assert_eq!(row.instrument, "rb2110.SHFE");
        assert_eq!(row.close, Decimal::from(5110));
        assert_eq!(row.open_interest, Decimal::from(120_533));
    }

    #[test]
    fn localize_shifts_exchange_time_to_utc() {
        let offset = default_venue_offset();
        let ts = localize(naive(9, 1), offset);
        assert_eq!(ts.to_rfc3339(), "2021-06-15T01:01:00+00:00");
    }

    #[test]
    fn both_row_shapes_normalize_to_the_same_bar() {
        let offset = default_venue_offset();
        let hist = HistoryRow {
            instrument: "rb2110.SHFE".into(),
            datetime: naive(9, 1),
            open: Decimal::from(5105),
            high: Decimal::from(5112),
            low: Decimal::from(5101),
            close: Decimal::from(5110),
            volume: Decimal::from(1834),
            open_interest: Decimal::from(120_533),
        };
        let live = LiveBarFrame {
            local_symbol: "rb2110.SHFE".into(),
            symbol: "rb2110".into(),
            datetime: naive(9, 1),
            open_price: Decimal::from(5105),
            high_price: Decimal::from(5112),
            low_price: Decimal::from(5101),
            close_price: Decimal::from(5110),
            volume: Decimal::from(1834),
            open_interest: Decimal::from(120_533),
        };
        assert_eq!(hist.into_bar(offset), live.into_bar(offset));
    }
}
