//! Rows store timestamps as epoch milliseconds so ordering and cutoff
//! comparisons stay exact in both backends.

use chrono::{DateTime, Utc};

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub fn now_millis() -> i64 {
    to_millis(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_conversion_drops_sub_millisecond_precision() {
        let ts = from_millis(1_700_000_000_123);
        assert_eq!(to_millis(ts), 1_700_000_000_123);
        assert_eq!(from_millis(0), DateTime::<Utc>::default());
    }
}
