use chrono::{DateTime, TimeZone, Utc};

/// Current instant as epoch milliseconds (the wire unit for all timestamps).
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current instant as RFC 3339, used for human-facing columns.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn epoch_ms_to_rfc3339(epoch_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .map(|dt: DateTime<Utc>| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_conversion() {
        let formatted = epoch_ms_to_rfc3339(0).unwrap();
        assert!(formatted.starts_with("1970-01-01T00:00:00"));
        assert!(epoch_ms_to_rfc3339(i64::MAX).is_none());
    }
}
