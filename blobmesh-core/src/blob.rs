// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::hash::Sha256;

/// Metadata of a blob as reported by a server listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    pub sha256: Sha256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Seconds since UNIX epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<u64>,
}

impl BlobRecord {
    pub fn new(sha256: Sha256) -> Self {
        Self {
            sha256,
            size: None,
            name: None,
            mime_type: None,
            url: None,
            uploaded_at: None,
        }
    }

    /// Number of non-empty descriptive fields (`name` and `mime_type`).
    ///
    /// When the same blob is listed by several servers the record with the higher score is used
    /// as the representative one.
    pub fn richness(&self) -> usize {
        [&self.name, &self.mime_type]
            .into_iter()
            .filter(|field| field.as_deref().is_some_and(|value| !value.trim().is_empty()))
            .count()
    }

    /// File name to show for this blob, falls back to the hash.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => self.sha256.to_hex(),
        }
    }

    /// Content type to use when uploading this blob somewhere else.
    pub fn content_type(&self) -> &str {
        match self.mime_type.as_deref() {
            Some(mime_type) if !mime_type.trim().is_empty() => mime_type,
            _ => "application/octet-stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Sha256;

    use super::BlobRecord;

    #[test]
    fn richness_counts_non_empty_fields() {
        let mut record = BlobRecord::new(Sha256::new(b"cat.png"));
        assert_eq!(record.richness(), 0);

        record.name = Some("  ".into());
        assert_eq!(record.richness(), 0);

        record.name = Some("cat.png".into());
        record.mime_type = Some("image/png".into());
        assert_eq!(record.richness(), 2);

        // Size and url don't count.
        record.size = Some(12);
        record.url = Some("https://cdn.example.com/abc".into());
        assert_eq!(record.richness(), 2);
    }

    #[test]
    fn display_name_and_content_type_fallbacks() {
        let hash = Sha256::new(b"data");
        let mut record = BlobRecord::new(hash);
        assert_eq!(record.display_name(), hash.to_hex());
        assert_eq!(record.content_type(), "application/octet-stream");

        record.name = Some("song.mp3".into());
        record.mime_type = Some("audio/mpeg".into());
        assert_eq!(record.display_name(), "song.mp3");
        assert_eq!(record.content_type(), "audio/mpeg");
    }
}
