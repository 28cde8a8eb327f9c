use http::HeaderMap;
use http::header::{ACCEPT, CONNECTION};

use crate::codec::Codec;
use crate::registry::Registry;

/// Weight assigned to an entry with no q-value, on the fixed-point 0-1000
/// scale.
const DEFAULT_WEIGHT: i32 = 1000;

/// Picks the response encoding from the client's `Accept-Encoding` header.
///
/// Entries are parsed as `token[;q=<float>]`; a malformed q-value is reported
/// and treated as the default rather than invalidating the whole header.
/// Entries for disabled algorithms or with weight 0 are discarded. The winner
/// is the maximum by (weight, priority); when both are equal, the entry
/// declared later in the header wins.
pub(crate) fn negotiate(header: Option<&str>, registry: &Registry) -> Option<Codec> {
    if !registry.any_enabled() {
        return None;
    }
    let header = header?;

    let mut best: Option<(Codec, i32, i32)> = None;
    for entry in header.split(',') {
        let entry = entry.trim().to_ascii_lowercase();
        if entry.is_empty() {
            continue;
        }
        let (token, weight) = parse_entry(&entry);
        let Some(codec) = Codec::from_token(token) else {
            continue;
        };
        if weight <= 0 || !registry.is_enabled(codec) {
            continue;
        }
        let priority = registry.priority(codec);
        let better = match best {
            None => true,
            // >= so that later entries win full ties.
            Some((_, best_weight, best_priority)) => {
                (weight, priority) >= (best_weight, best_priority)
            }
        };
        if better {
            best = Some((codec, weight, priority));
        }
    }

    let winner = best.map(|(codec, _, _)| codec);
    if let Some(codec) = winner {
        tracing::debug!(encoding = codec.token(), "negotiated response encoding");
    }
    winner
}

fn parse_entry(entry: &str) -> (&str, i32) {
    let mut parts = entry.splitn(2, ';');
    let token = parts.next().unwrap_or("").trim();
    let weight = match parts.next() {
        None => DEFAULT_WEIGHT,
        Some(params) => match params.trim().strip_prefix("q=") {
            None => DEFAULT_WEIGHT,
            Some(q) => match q.trim().parse::<f32>() {
                Ok(q) => (q * 1000.0) as i32,
                Err(_) => {
                    tracing::warn!(
                        entry = %entry,
                        "malformed q-value in accept-encoding, assuming default"
                    );
                    DEFAULT_WEIGHT
                }
            },
        },
    };
    (token, weight)
}

/// Whether the request is for a streaming or protocol-upgrade response, which
/// must never be compressed regardless of negotiation.
pub(crate) fn is_streaming_request(headers: &HeaderMap) -> bool {
    header_contains(headers, ACCEPT, "text/event-stream")
        || header_contains(headers, CONNECTION, "upgrade")
}

fn header_contains(headers: &HeaderMap, name: http::header::HeaderName, needle: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains(needle))
}
