//! Tabular export of successful claims

use crate::{
    types::{ChannelId, LedgerState},
    Error, Result,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// One exported claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    /// Channel the payout went through
    #[serde(rename = "network")]
    pub channel: String,

    /// Participant that claimed
    #[serde(rename = "userId")]
    pub participant: String,

    /// Destination address
    pub address: String,

    /// Settlement reference
    #[serde(rename = "txHash")]
    pub reference: String,

    /// Block height, if known
    #[serde(rename = "blockNumber")]
    pub block_height: Option<u64>,

    /// ISO-8601 timestamp
    #[serde(rename = "ts", serialize_with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

fn iso8601<S: serde::Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Rows for one channel, or every channel when `channel` is `None`
pub fn export_rows(state: &LedgerState, channel: Option<&ChannelId>) -> Vec<ExportRow> {
    state
        .channels
        .iter()
        .filter(|(id, _)| channel.map_or(true, |wanted| *id == wanted))
        .flat_map(|(id, channel_state)| {
            channel_state.claims.iter().map(move |receipt| ExportRow {
                channel: id.to_string(),
                participant: receipt.participant.to_string(),
                address: receipt.address.clone(),
                reference: receipt.reference.clone(),
                block_height: receipt.block_height,
                timestamp: receipt.timestamp,
            })
        })
        .collect()
}

/// Render rows as CSV with a header and every field quoted
pub fn to_csv(rows: &[ExportRow]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    if rows.is_empty() {
        writer.write_record(["network", "userId", "address", "txHash", "blockNumber", "ts"])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Export(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClaimRecord, ParticipantId};
    use chrono::TimeZone;

    fn sample_state() -> LedgerState {
        let base = ChannelId::new("base-usdt");
        let sepolia = ChannelId::new("sepolia-eth");
        let mut state = LedgerState::with_channels([&base, &sepolia]);
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

        state.channel_mut(&base).record_success(
            ParticipantId::new("1"),
            ClaimRecord {
                address: "0xaa".to_string(),
                reference: "0x01".to_string(),
                block_height: Some(100),
                timestamp: at,
            },
        );
        state.channel_mut(&sepolia).record_success(
            ParticipantId::new("2"),
            ClaimRecord {
                address: "0xbb".to_string(),
                reference: "0x02".to_string(),
                block_height: None,
                timestamp: at,
            },
        );
        state
    }

    #[test]
    fn test_export_filters_channel() {
        let state = sample_state();
        assert_eq!(export_rows(&state, None).len(), 2);

        let rows = export_rows(&state, Some(&ChannelId::new("sepolia-eth")));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].participant, "2");
    }

    #[test]
    fn test_csv_quotes_every_field() {
        let rows = export_rows(&sample_state(), Some(&ChannelId::new("base-usdt")));
        let csv = to_csv(&rows).unwrap();
        let mut lines = csv.lines();

        assert_eq!(
            lines.next().unwrap(),
            r#""network","userId","address","txHash","blockNumber","ts""#
        );
        assert_eq!(
            lines.next().unwrap(),
            r#""base-usdt","1","0xaa","0x01","100","2023-11-14T22:13:20.000Z""#
        );
    }

    #[test]
    fn test_csv_doubles_embedded_quotes() {
        let mut rows = export_rows(&sample_state(), Some(&ChannelId::new("sepolia-eth")));
        rows[0].participant = "a\"b".to_string();
        let csv = to_csv(&rows).unwrap();
        assert!(csv.contains(r#""a""b""#));
        assert!(csv.contains(r#""0x02","","#));
    }

    #[test]
    fn test_csv_header_only_when_empty() {
        let csv = to_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }
}
