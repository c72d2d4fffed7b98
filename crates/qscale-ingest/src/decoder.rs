//! Resilient access-log decoder.
//!
//! A payload is `<syslog prefix><marker><JSON object>`. Splitting log lines
//! over UDP leaves the JSON truncated, doubly terminated, or missing its
//! closing brace, so the body is run through a short list of repair
//! strategies and the first one that yields a valid record wins.
//!
//! The decoder holds no mutable state and is shared by every lane.

use std::borrow::Cow;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer};
use tracing::{debug, trace};

use qscale_core::{AccessEvent, ServiceKey};

use crate::error::DecodeError;

/// Fields of the ingress JSON log format we rely on. Unknown fields are
/// ignored.
#[derive(Debug, Deserialize)]
struct AccessRecord {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    service: String,
    /// Epoch seconds with millisecond fraction.
    #[serde(deserialize_with = "epoch_secs")]
    time_msec: SystemTime,
    #[serde(default)]
    upstream_addr: String,
    #[serde(default)]
    status: u16,
}

fn epoch_secs<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs)
        .map(|since| UNIX_EPOCH + since)
        .map_err(serde::de::Error::custom)
}

type Repair = for<'a> fn(&'a [u8]) -> Cow<'a, [u8]>;

/// Tried in order; the first candidate that parses is used.
const STRATEGIES: &[(&str, Repair)] = &[("as-is", as_is), ("boundary", repair_boundary)];

fn as_is(data: &[u8]) -> Cow<'_, [u8]> {
    Cow::Borrowed(data)
}

/// Normalize the trailing boundary of a JSON object.
///
/// - several `}`: cut right after the brace that balances the opening `{`
///   (falling back to the last `}` if nothing balances)
/// - one `}`: cut right after it
/// - none: close an open string if needed, then append `}`
fn repair_boundary(data: &[u8]) -> Cow<'_, [u8]> {
    let data = data.trim_ascii_end();
    let closing = data.iter().filter(|&&b| b == b'}').count();
    match closing {
        0 => {
            let mut fixed = Vec::with_capacity(data.len() + 2);
            fixed.extend_from_slice(data);
            if fixed.last() != Some(&b'"') {
                fixed.push(b'"');
            }
            fixed.push(b'}');
            Cow::Owned(fixed)
        }
        1 => {
            let end = data.iter().position(|&b| b == b'}').unwrap_or(data.len() - 1);
            Cow::Borrowed(&data[..=end])
        }
        _ => {
            let end = balancing_brace(data)
                .or_else(|| data.iter().rposition(|&b| b == b'}'))
                .unwrap_or(data.len() - 1);
            Cow::Borrowed(&data[..=end])
        }
    }
}

/// Index of the `}` that closes the first `{`, skipping braces inside
/// string literals.
fn balancing_brace(data: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in data.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// nginx writes non-ASCII URL bytes as `\xHH`, which is not valid JSON.
/// Drop the `\x` so the hex digits survive as plain text.
fn scrub_hex_escapes(body: &[u8]) -> Cow<'_, [u8]> {
    if !body.windows(2).any(|w| w == b"\\x") {
        return Cow::Borrowed(body);
    }
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'\\' && body.get(i + 1) == Some(&b'x') {
            i += 2;
            continue;
        }
        out.push(body[i]);
        i += 1;
    }
    Cow::Owned(out)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[derive(Debug, Clone)]
pub struct Decoder {
    marker: Vec<u8>,
}

impl Decoder {
    /// Decoder for payloads carrying `marker` before the JSON body.
    pub fn new(marker: impl AsRef<[u8]>) -> Self {
        Self {
            marker: marker.as_ref().to_vec(),
        }
    }

    /// The log marker this decoder splits on.
    pub fn marker(&self) -> &[u8] {
        &self.marker
    }

    /// The JSON body, if the payload contains the marker exactly once.
    fn body<'a>(&self, raw: &'a [u8]) -> Option<&'a [u8]> {
        if self.marker.is_empty() {
            return Some(raw);
        }
        let start = find(raw, &self.marker)?;
        let body = &raw[start + self.marker.len()..];
        if find(body, &self.marker).is_some() {
            return None;
        }
        Some(body)
    }

    /// Decode one raw payload.
    ///
    /// Returns `Ok(None)` for payloads that are not access records (wrong
    /// marker, no JSON object, or no service identity), and
    /// `Err(Malformed)` with the original bytes when every repair fails.
    pub fn decode(&self, raw: &[u8]) -> Result<Option<AccessEvent>, DecodeError> {
        let Some(body) = self.body(raw) else {
            debug!(raw = %String::from_utf8_lossy(raw), "not an ingress access log");
            return Ok(None);
        };
        if !body.starts_with(b"{") {
            return Ok(None);
        }

        let body = scrub_hex_escapes(body);
        let record = STRATEGIES.iter().find_map(|(name, repair)| {
            let candidate = repair(body.as_ref());
            match serde_json::from_slice::<AccessRecord>(&candidate) {
                Ok(record) => Some(record),
                Err(e) => {
                    trace!(strategy = *name, error = %e, "repair strategy failed");
                    None
                }
            }
        });
        let Some(record) = record else {
            return Err(DecodeError::Malformed { raw: raw.to_vec() });
        };

        let service_key = ServiceKey::new(record.service, record.namespace);
        if service_key.is_placeholder() {
            return Ok(None);
        }

        Ok(Some(AccessEvent {
            access_time: record.time_msec,
            upstream: record.upstream_addr,
            service_key,
            status: record.status,
        }))
    }
}
