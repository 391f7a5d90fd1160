// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage servers registered by the user.
use std::fmt;
use std::hash::{Hash as StdHash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire protocol spoken by a storage server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Blossom,
    Nip96,
    Satellite,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerKind::Blossom => "blossom",
            ServerKind::Nip96 => "nip96",
            ServerKind::Satellite => "satellite",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized base URL of a storage server.
///
/// Surrounding whitespace and trailing slashes are stripped. Two URLs are equal when they only
/// differ in letter case, the original spelling is kept for display and requests.
#[derive(Clone)]
pub struct ServerUrl {
    url: String,
    key: String,
}

impl ServerUrl {
    pub fn new(url: &str) -> Result<Self, ServerUrlError> {
        let url = url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(ServerUrlError::Empty);
        }

        if url.chars().any(char::is_whitespace) {
            return Err(ServerUrlError::Whitespace(url.to_owned()));
        }

        Ok(Self {
            url: url.to_owned(),
            key: url.to_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Lowercase form used for identity comparisons.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Join a path segment onto the base URL.
    pub fn join(&self, segment: &str) -> String {
        format!("{}/{}", self.url, segment.trim_start_matches('/'))
    }
}

impl PartialEq for ServerUrl {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ServerUrl {}

impl StdHash for ServerUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for ServerUrl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerUrl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl FromStr for ServerUrl {
    type Err = ServerUrlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl fmt::Display for ServerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl fmt::Debug for ServerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServerUrl").field(&self.url).finish()
    }
}

impl Serialize for ServerUrl {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.url)
    }
}

impl<'de> Deserialize<'de> for ServerUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::new(&value).map_err(|err| serde::de::Error::custom(err.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum ServerUrlError {
    #[error("server url is empty")]
    Empty,

    #[error("server url \"{0}\" contains whitespace")]
    Whitespace(String),
}

/// A storage server registered by the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub url: ServerUrl,
    pub name: String,
    pub kind: ServerKind,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub sync_enabled: bool,
}

impl Server {
    pub fn new(url: ServerUrl, name: impl Into<String>, kind: ServerKind) -> Self {
        Self {
            url,
            name: name.into(),
            kind,
            requires_auth: false,
            sync_enabled: false,
        }
    }

    pub fn with_sync(mut self, sync_enabled: bool) -> Self {
        self.sync_enabled = sync_enabled;
        self
    }

    pub fn with_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }
}
