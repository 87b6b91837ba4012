//! Bucket → master key mapping.
//!
//! Parsed from `KMS_BUCKET_KEY_MAPPING`, a comma-separated list of
//! `<bucket>[/<prefix>]:<key>` entries, or `*:<key>` for a single global key:
//!
//! ```text
//! *:projects/p/locations/global/keyRings/r/cryptoKeys/k
//! training-data:gcp-kms://projects/p/.../cryptoKeys/a,checkpoints/run-7:aws-kms://alias/ckpt
//! ```
//!
//! A global entry overrides every other entry. Otherwise the entry with the
//! longest matching `bucket/prefix` wins.

use std::str::FromStr;

use envelope::kms::HandleError;
use envelope::MasterKeyHandle;
use thiserror::Error;

/// Bucket wildcard naming the global key.
pub const GLOBAL_BUCKET: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyMapError {
    #[error("bucket key mapping is empty")]
    Empty,

    #[error("mapping entry {0:?} is not of the form <bucket>[/<prefix>]:<key>")]
    MalformedEntry(String),

    #[error("mapping entry {entry:?} has an invalid key: {source}")]
    InvalidKey {
        entry: String,
        #[source]
        source: HandleError,
    },

    #[error("bucket scope {0:?} is mapped more than once")]
    DuplicateScope(String),

    #[error("object path {0:?} does not name a bucket")]
    InvalidObjectPath(String),

    #[error("no master key is mapped for bucket {0:?}")]
    Unmapped(String),
}

/// An object path split into its bucket and object name.
///
/// The original string, not these parts, is what gets bound as associated
/// data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLocation<'a> {
    pub bucket: &'a str,
    pub object: &'a str,
}

impl<'a> ObjectLocation<'a> {
    /// Split `gs://bucket/object/name` (scheme optional) into bucket and
    /// object name.
    pub fn parse(path: &'a str) -> Result<Self, KeyMapError> {
        let rest = path.split_once("://").map_or(path, |(_, rest)| rest);
        let (bucket, object) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(KeyMapError::InvalidObjectPath(path.to_owned()));
        }
        Ok(Self { bucket, object })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scope {
    bucket: String,
    /// Object-name prefix without surrounding slashes; empty for the whole bucket.
    prefix: String,
}

impl Scope {
    fn parse(s: &str) -> Self {
        let (bucket, prefix) = s.split_once('/').unwrap_or((s, ""));
        Self {
            bucket: bucket.to_owned(),
            prefix: prefix.trim_matches('/').to_owned(),
        }
    }

    fn matches(&self, location: &ObjectLocation<'_>) -> bool {
        if self.bucket != location.bucket {
            return false;
        }
        if self.prefix.is_empty() {
            return true;
        }
        match location.object.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.prefix.is_empty() {
            f.write_str(&self.bucket)
        } else {
            write!(f, "{}/{}", self.bucket, self.prefix)
        }
    }
}

/// Immutable routing table from object paths to master keys.
#[derive(Debug, Clone)]
pub struct KeyMapping {
    global: Option<MasterKeyHandle>,
    entries: Vec<(Scope, MasterKeyHandle)>,
}

impl KeyMapping {
    /// A mapping that sends every object to `key`.
    pub fn global(key: MasterKeyHandle) -> Self {
        Self {
            global: Some(key),
            entries: Vec::new(),
        }
    }

    /// The master key for `object_path`.
    ///
    /// # Errors
    ///
    /// [`KeyMapError::InvalidObjectPath`] if no global key is set and the
    /// path has no bucket, [`KeyMapError::Unmapped`] if no entry covers it.
    pub fn resolve(&self, object_path: &str) -> Result<&MasterKeyHandle, KeyMapError> {
        if let Some(key) = &self.global {
            return Ok(key);
        }
        let location = ObjectLocation::parse(object_path)?;
        self.entries
            .iter()
            .filter(|(scope, _)| scope.matches(&location))
            .max_by_key(|(scope, _)| scope.prefix.len())
            .map(|(_, key)| key)
            .ok_or_else(|| KeyMapError::Unmapped(location.bucket.to_owned()))
    }

    /// Every distinct key the mapping can resolve to, in configuration order.
    pub fn handles(&self) -> Vec<&MasterKeyHandle> {
        let mut out: Vec<&MasterKeyHandle> = Vec::new();
        let all = self.global.iter().chain(self.entries.iter().map(|(_, k)| k));
        for key in all {
            if !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }
}

impl FromStr for KeyMapping {
    type Err = KeyMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut global = None;
        let mut entries: Vec<(Scope, MasterKeyHandle)> = Vec::new();

        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (scope, key) = entry
                .split_once(':')
                .map(|(scope, key)| (scope.trim(), key.trim()))
                .filter(|(scope, key)| !scope.is_empty() && !key.is_empty())
                .ok_or_else(|| KeyMapError::MalformedEntry(entry.to_owned()))?;
            let key = MasterKeyHandle::parse(key).map_err(|source| KeyMapError::InvalidKey {
                entry: entry.to_owned(),
                source,
            })?;

            if scope == GLOBAL_BUCKET {
                if global.is_some() {
                    return Err(KeyMapError::DuplicateScope(GLOBAL_BUCKET.to_owned()));
                }
                global = Some(key);
                continue;
            }
            let scope = Scope::parse(scope);
            if entries.iter().any(|(s, _)| *s == scope) {
                return Err(KeyMapError::DuplicateScope(scope.to_string()));
            }
            entries.push((scope, key));
        }

        if global.is_none() && entries.is_empty() {
            return Err(KeyMapError::Empty);
        }
        Ok(Self { global, entries })
    }
}
