//! Bucketed key descriptors and their backend addressing shapes.

use super::calendar::Calendar;
use super::granularity::Granularity;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used when a key is displayed.
pub const DEFAULT_SEPARATOR: &str = ":";

/// How a backend addresses a bucketed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// Base name, granularity and bucket start in separate fields.
    #[default]
    Separated,
    /// Prefix, base name and granularity joined; bucket start separate.
    PartialJoined,
    /// Everything, including unix bucket start, joined into one string.
    FullJoined,
}

/// Backend-facing address of a bucket, shaped by [`AddressingMode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Identifier<T> {
    FullJoined { key: String },
    PartialJoined { key: String, at: T },
    Separated { key: String, granularity: String, at: T },
}

impl<T> Identifier<T> {
    pub fn key(&self) -> &str {
        match self {
            Identifier::FullJoined { key }
            | Identifier::PartialJoined { key, .. }
            | Identifier::Separated { key, .. } => key,
        }
    }

    pub fn granularity(&self) -> Option<&str> {
        match self {
            Identifier::Separated { granularity, .. } => Some(granularity),
            _ => None,
        }
    }

    pub fn at(&self) -> Option<&T> {
        match self {
            Identifier::FullJoined { .. } => None,
            Identifier::PartialJoined { at, .. } | Identifier::Separated { at, .. } => Some(at),
        }
    }

    pub fn mode(&self) -> AddressingMode {
        match self {
            Identifier::FullJoined { .. } => AddressingMode::FullJoined,
            Identifier::PartialJoined { .. } => AddressingMode::PartialJoined,
            Identifier::Separated { .. } => AddressingMode::Separated,
        }
    }
}

/// Identity of a bucket independent of zone and addressing mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeySignature {
    pub prefix: Option<String>,
    pub base_name: String,
    pub granularity: Granularity,
    pub unix_seconds: i64,
}

/// A base name attributed to one bucket of one granularity.
///
/// `bucket_start` is always a floored instant, so building a key from its
/// own start yields the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    prefix: Option<String>,
    base_name: String,
    granularity: Granularity,
    bucket_start: DateTime<Tz>,
}

impl BucketKey {
    pub fn new(
        base_name: impl Into<String>,
        granularity: Granularity,
        instant: &DateTime<Tz>,
        calendar: &Calendar,
    ) -> Self {
        Self {
            prefix: None,
            base_name: base_name.into(),
            granularity,
            bucket_start: calendar.floor(instant, granularity),
        }
    }

    /// Copy of this key inside the `prefix` namespace.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..self.clone()
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn granularity_tag(&self) -> String {
        self.granularity.tag()
    }

    pub fn bucket_start(&self) -> DateTime<Tz> {
        self.bucket_start
    }

    pub fn unix_seconds(&self) -> i64 {
        self.bucket_start.timestamp()
    }

    pub fn signature(&self) -> KeySignature {
        KeySignature {
            prefix: self.prefix.clone(),
            base_name: self.base_name.clone(),
            granularity: self.granularity,
            unix_seconds: self.unix_seconds(),
        }
    }

    /// All present components joined, bucket start as unix seconds.
    pub fn encode(&self, separator: &str) -> String {
        let mut joined = self.name_with_granularity(separator);
        joined.push_str(separator);
        joined.push_str(&self.unix_seconds().to_string());
        joined
    }

    pub fn identifier(&self, separator: &str, mode: AddressingMode) -> Identifier<DateTime<Tz>> {
        self.shape(separator, mode, self.bucket_start)
    }

    /// Like [`identifier`](Self::identifier) but with the bucket start
    /// always as unix seconds, for correlating backend rows to keys.
    pub fn simple_identifier(&self, separator: &str, mode: AddressingMode) -> Identifier<i64> {
        self.shape(separator, mode, self.unix_seconds())
    }

    fn shape<T>(&self, separator: &str, mode: AddressingMode, at: T) -> Identifier<T> {
        match mode {
            AddressingMode::FullJoined => Identifier::FullJoined {
                key: self.encode(separator),
            },
            AddressingMode::PartialJoined => Identifier::PartialJoined {
                key: self.name_with_granularity(separator),
                at,
            },
            AddressingMode::Separated => Identifier::Separated {
                key: self.base_name.clone(),
                granularity: self.granularity_tag(),
                at,
            },
        }
    }

    fn name_with_granularity(&self, separator: &str) -> String {
        let tag = self.granularity_tag();
        let parts: Vec<&str> = self
            .prefix
            .as_deref()
            .into_iter()
            .chain([self.base_name.as_str(), tag.as_str()])
            .collect();
        parts.join(separator)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode(DEFAULT_SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use chrono_tz::Asia::Tokyo;
    use pretty_assertions::assert_eq;

    fn at(text: &str) -> DateTime<Tz> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Tz::UTC)
    }

    fn key() -> BucketKey {
        BucketKey::new("page_views", "1h".parse().unwrap(), &at("2024-05-01T10:37:45Z"), &Calendar::default())
            .with_prefix("stats")
    }

    #[test]
    fn test_new_floors_instant() {
        let key = key();
        assert_eq!(key.bucket_start(), at("2024-05-01T10:00:00Z"));
        assert_eq!(key.unix_seconds(), 1_714_557_600);
    }

    #[test]
    fn test_encode_skips_missing_prefix() {
        let bare = BucketKey::new("hits", "1d".parse().unwrap(), &at("2024-05-01T10:37:45Z"), &Calendar::default());
        assert_eq!(bare.encode("/"), "hits/1d/1714521600");
        assert_eq!(key().encode(":"), "stats:page_views:1h:1714557600");
        assert_eq!(key().to_string(), "stats:page_views:1h:1714557600");
    }

    #[test]
    fn test_identifier_shapes() {
        let key = key();
        assert_eq!(
            key.identifier(":", AddressingMode::FullJoined),
            Identifier::FullJoined {
                key: "stats:page_views:1h:1714557600".to_string()
            }
        );
        assert_eq!(
            key.identifier(":", AddressingMode::PartialJoined),
            Identifier::PartialJoined {
                key: "stats:page_views:1h".to_string(),
                at: at("2024-05-01T10:00:00Z"),
            }
        );
        assert_eq!(
            key.identifier(":", AddressingMode::Separated),
            Identifier::Separated {
                key: "page_views".to_string(),
                granularity: "1h".to_string(),
                at: at("2024-05-01T10:00:00Z"),
            }
        );
    }

    #[test]
    fn test_simple_identifier_uses_unix_seconds_in_every_mode() {
        let key = key();
        for mode in [AddressingMode::FullJoined, AddressingMode::PartialJoined, AddressingMode::Separated] {
            let id = key.simple_identifier(":", mode);
            assert_eq!(id.mode(), mode);
            if let Some(at) = id.at() {
                assert_eq!(*at, 1_714_557_600);
            } else {
                assert!(id.key().ends_with(":1714557600"));
            }
        }
    }

    #[test]
    fn test_equal_buckets_in_different_zones_address_identically() {
        let utc_key = key();
        let tokyo = Calendar::new(Tokyo, Weekday::Mon);
        let tokyo_key = BucketKey::new(
            "page_views",
            "1h".parse().unwrap(),
            &tokyo.localize(&at("2024-05-01T10:05:00Z")),
            &tokyo,
        )
        .with_prefix("stats");

        assert_eq!(utc_key.signature(), tokyo_key.signature());
        for mode in [AddressingMode::FullJoined, AddressingMode::PartialJoined, AddressingMode::Separated] {
            assert_eq!(utc_key.identifier(":", mode), tokyo_key.identifier(":", mode));
            assert_eq!(utc_key.simple_identifier(":", mode), tokyo_key.simple_identifier(":", mode));
        }
    }

    #[test]
    fn test_rebuilding_from_bucket_start_is_stable() {
        let key = key();
        let rebuilt = BucketKey::new("page_views", key.granularity(), &key.bucket_start(), &Calendar::default())
            .with_prefix("stats");
        assert_eq!(rebuilt, key);
    }

    #[test]
    fn test_addressing_mode_serde_names() {
        let mode: AddressingMode = serde_yaml::from_str("partial_joined").unwrap();
        assert_eq!(mode, AddressingMode::PartialJoined);
        assert_eq!(serde_json::to_string(&AddressingMode::FullJoined).unwrap(), "\"full_joined\"");
    }
}
