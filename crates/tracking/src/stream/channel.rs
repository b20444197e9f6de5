//! Relay channel naming: `tracking:{session_id}:broadcast`

const CHANNEL_PREFIX: &str = "tracking:";
const CHANNEL_SUFFIX: &str = ":broadcast";

/// Pattern the relay bridge subscribes to
pub const BROADCAST_PATTERN: &str = "tracking:*:broadcast";

/// Relay channel carrying live updates for `session_id`
pub fn broadcast_channel(session_id: &str) -> String {
    format!("{}{}{}", CHANNEL_PREFIX, session_id, CHANNEL_SUFFIX)
}

/// Session id encoded in a relay channel name
///
/// Malformed names yield an empty string.
pub fn session_id_from_channel(channel: &str) -> String {
    channel
        .strip_prefix(CHANNEL_PREFIX)
        .and_then(|rest| rest.strip_suffix(CHANNEL_SUFFIX))
        .unwrap_or_default()
        .to_string()
}

/// Glob match supporting `*` wildcards, as used by redis `PSUBSCRIBE`
pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = channel.strip_prefix(first) else {
        return false;
    };

    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // no wildcard at all
        return rest.is_empty();
    };

    for segment in middle {
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}
