//! Metadata tagging of the assembled file.
//!
//! The pipeline describes what to write in a [`TagRequest`]; a [`Tagger`]
//! decides how. [`Id3Tagger`] is the ID3v2.3 implementation with chapter
//! support.

pub mod id3;

pub use id3::Id3Tagger;

use crate::error::Result;
use crate::models::Chapter;
use async_trait::async_trait;
use std::path::Path;

/// Semantic tag fields, independent of the tag format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKey {
    Station,
    Artist,
    Album,
    /// `"n/m"`
    Track,
    Title,
    Comment,
    Year,
    /// `DDMM`
    Date,
    /// `HHMM`
    Time,
    Language,
    SourceUrl,
    StationUrl,
}

/// Embedded cover art.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Everything a tagger is asked to write into one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagRequest {
    fields: Vec<(TagKey, String)>,
    pub duration_ms: u64,
    pub cover: Option<CoverImage>,
    pub chapters: Vec<Chapter>,
}

impl TagRequest {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            ..Default::default()
        }
    }

    /// Add a field. Blank values are ignored; a repeated key replaces the
    /// earlier value.
    pub fn with_field(mut self, key: TagKey, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            return self;
        }
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    pub fn with_cover(mut self, cover: Option<CoverImage>) -> Self {
        self.cover = cover;
        self
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    pub fn get(&self, key: TagKey) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (TagKey, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Writes tags into an audio file in place.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn write_tags(&self, path: &Path, request: &TagRequest) -> Result<()>;
}
