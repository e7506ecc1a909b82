//! Tag data batching
//!
//! Readings are sorted by device, split into payloads of at most
//! [`MAX_TAGS_PER_BATCH`] tags and rounded according to the fraction
//! display format held in the config cache. All payloads of one call
//! share the caller's timestamp.

use crate::cache::ConfigCache;
use crate::protocol::edge::{EdgeData, EdgeTag, TagValue};
use crate::protocol::messages::{Envelope, TagData};
use chrono::{NaiveDateTime, TimeZone, Timelike, Utc};

/// Upper bound on tag readings carried by one data payload
pub const MAX_TAGS_PER_BATCH: usize = 100;

/// Every finite f64 is exact at this many fraction digits
const MAX_FRACTION_DIGITS: u32 = 1074;

/// Encode readings into data payloads using the host time zone
pub fn encode_tag_data(
    data: &EdgeData,
    cache: &ConfigCache,
) -> Result<Vec<Vec<u8>>, serde_json::Error> {
    encode_tag_data_in(data, cache, &chrono::Local)
}

/// Encode readings, interpreting the timestamp as wall-clock time in `tz`
///
/// Zero readings produce zero payloads.
pub fn encode_tag_data_in<Tz: TimeZone>(
    data: &EdgeData,
    cache: &ConfigCache,
    tz: &Tz,
) -> Result<Vec<Vec<u8>>, serde_json::Error> {
    let ts = render_timestamp(&data.timestamp, tz);

    batch_tags(&data.tag_list)
        .into_iter()
        .map(|batch| {
            let mut d = TagData::new();
            for tag in batch {
                let value = match cache.fraction_format(&tag.device_id, &tag.tag_name) {
                    Some(digits) => round_value(&tag.value, digits),
                    None => tag.value.clone(),
                };
                d.entry(tag.device_id.clone())
                    .or_default()
                    .insert(tag.tag_name.clone(), value);
            }
            serde_json::to_vec(&Envelope { ts: ts.clone(), d })
        })
        .collect()
}

/// Stable sort by device id, then chunk
fn batch_tags(tags: &[EdgeTag]) -> Vec<Vec<&EdgeTag>> {
    let mut sorted: Vec<&EdgeTag> = tags.iter().collect();
    sorted.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    sorted
        .chunks(MAX_TAGS_PER_BATCH)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Round through the decimal string form so the result matches what a
/// display with `digits` fraction digits shows
pub fn round_value(value: &TagValue, digits: u32) -> TagValue {
    match value {
        TagValue::Number(n) => TagValue::Number(round_to_digits(*n, digits)),
        TagValue::Array(values) => {
            TagValue::Array(values.iter().map(|v| round_value(v, digits)).collect())
        }
        other => other.clone(),
    }
}

fn round_to_digits(value: f64, digits: u32) -> f64 {
    let digits = digits.min(MAX_FRACTION_DIGITS) as usize;
    format!("{value:.digits$}")
        .parse()
        .unwrap_or(value)
}

/// Interpret `naive` as wall-clock time in `tz`, then render it in UTC as
/// RFC 3339 with trailing zeros of the fraction trimmed.
pub fn render_timestamp<Tz: TimeZone>(naive: &NaiveDateTime, tz: &Tz) -> String {
    let utc = tz
        .from_local_datetime(naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(naive));

    let mut rendered = utc.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = utc.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let fraction = format!("{nanos:09}");
        rendered.push('.');
        rendered.push_str(fraction.trim_end_matches('0'));
    }
    rendered.push('Z');
    rendered
}
