use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer};

/// RFC3339 with any offset, normalized to UTC. Blank strings and the Go zero
/// time (`0001-01-01T00:00:00Z`) mean "not set".
pub(crate) fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .map_err(|err| serde::de::Error::custom(format!("invalid timestamp {trimmed:?}: {err}")))?
        .with_timezone(&Utc);
    if parsed.year() <= 1 {
        return Ok(None);
    }
    Ok(Some(parsed))
}
