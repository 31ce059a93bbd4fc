//! ID3v2.3 tagging with chapter (CHAP) and table-of-contents (CTOC) frames,
//! written through the `id3` crate.

use super::{CoverImage, TagKey, TagRequest, Tagger};
use crate::error::{RelivError, Result};
use crate::models::Chapter;
use ::id3::frame::{Chapter as ChapterFrame, Comment, Picture, PictureType, TableOfContents};
use ::id3::{Encoding, Frame, Tag, TagLike, Version};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

const CHAP_NO_OFFSET: u32 = 0xFFFF_FFFF;
const TOC_ELEMENT_ID: &str = "toc";
const TOC_TITLE: &str = "Table Of Contents";
/// CTOC stores its entry count in a single byte.
const MAX_TOC_ENTRIES: usize = 255;
/// Stacked tags removed before the new one is written.
const MAX_STRIPPED_TAGS: usize = 8;

/// Writes an ID3v2.3 tag in front of the audio, replacing any existing
/// ID3v2 tag.
#[derive(Debug, Clone)]
pub struct Id3Tagger {
    comment_language: String,
}

impl Default for Id3Tagger {
    fn default() -> Self {
        Self {
            comment_language: "deu".to_string(),
        }
    }
}

impl Id3Tagger {
    /// `language` is the ISO-639-2 code used for comment frames.
    pub fn new(language: &str) -> Result<Self> {
        if language.len() != 3 || !language.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(RelivError::Config(format!(
                "tag language must be a 3-letter code, got {language:?}"
            )));
        }
        Ok(Self {
            comment_language: language.to_ascii_lowercase(),
        })
    }

    /// Build the tag for `request` without touching any file.
    pub fn build_tag(&self, request: &TagRequest) -> Result<Tag> {
        let mut tag = Tag::with_version(Version::Id3v23);

        for (key, value) in request.fields() {
            let frame = match key {
                TagKey::Comment => Frame::from(Comment {
                    lang: self.comment_language.clone(),
                    description: String::new(),
                    text: value.to_string(),
                })
                .set_encoding(Some(text_encoding(value))),
                TagKey::SourceUrl | TagKey::StationUrl => Frame::link(frame_id(key), value),
                _ => text_frame(frame_id(key), value),
            };
            tag.add_frame(frame);
        }

        if request.duration_ms > 0 {
            tag.add_frame(text_frame("TLEN", &request.duration_ms.to_string()));
        }

        if let Some(cover) = &request.cover {
            tag.add_frame(picture_frame(cover));
        }

        if !request.chapters.is_empty() {
            tag.add_frame(toc_frame(&request.chapters)?);
            for chapter in &request.chapters {
                tag.add_frame(chapter_frame(chapter)?);
            }
        }

        Ok(tag)
    }
}

#[async_trait]
impl Tagger for Id3Tagger {
    async fn write_tags(&self, path: &Path, request: &TagRequest) -> Result<()> {
        let tag = self.build_tag(request)?;
        let target = path.to_path_buf();

        tokio::task::spawn_blocking(move || replace_tag(&target, &tag))
            .await
            .map_err(|e| RelivError::Tagging(format!("tag writer task failed: {e}")))??;

        debug!(
            "Wrote tag with {} chapters to {}",
            request.chapters.len(),
            path.display()
        );
        Ok(())
    }
}

/// Remove every leading ID3v2 tag, then write `tag` in front of the audio.
fn replace_tag(path: &Path, tag: &Tag) -> Result<()> {
    let tagging_error =
        |e: ::id3::Error| RelivError::Tagging(format!("{}: {e}", path.display()));

    for _ in 0..MAX_STRIPPED_TAGS {
        if !Tag::remove_from_path(path).map_err(tagging_error)? {
            break;
        }
    }
    tag.write_to_path(path, Version::Id3v23)
        .map_err(tagging_error)
}

fn frame_id(key: TagKey) -> &'static str {
    match key {
        TagKey::Station => "TRSN",
        TagKey::Artist => "TPE1",
        TagKey::Album => "TALB",
        TagKey::Track => "TRCK",
        TagKey::Title => "TIT2",
        TagKey::Comment => "COMM",
        TagKey::Year => "TYER",
        TagKey::Date => "TDAT",
        TagKey::Time => "TIME",
        TagKey::Language => "TLAN",
        TagKey::SourceUrl => "WOAS",
        TagKey::StationUrl => "WORS",
    }
}

/// Latin-1 when every character fits, UTF-16 with BOM otherwise.
fn text_encoding(text: &str) -> Encoding {
    if text.chars().all(|c| u32::from(c) <= 0xFF) {
        Encoding::Latin1
    } else {
        Encoding::UTF16
    }
}

fn text_frame(id: &str, text: &str) -> Frame {
    Frame::text(id, text).set_encoding(Some(text_encoding(text)))
}

fn picture_frame(cover: &CoverImage) -> Frame {
    Frame::from(Picture {
        mime_type: cover.mime_type.clone(),
        picture_type: PictureType::CoverFront,
        description: String::new(),
        data: cover.data.clone(),
    })
    .set_encoding(Some(Encoding::Latin1))
}

fn chapter_frame(chapter: &Chapter) -> Result<Frame> {
    let to_u32 = |ms: u64| {
        u32::try_from(ms).map_err(|_| {
            RelivError::Tagging(format!("chapter {} offset {ms}ms out of range", chapter.id))
        })
    };

    let mut frames = Vec::new();
    if !chapter.label.is_empty() {
        frames.push(text_frame("TIT2", &chapter.label));
    }

    Ok(Frame::from(ChapterFrame {
        element_id: chapter.id.clone(),
        start_time: to_u32(chapter.start_offset_ms)?,
        end_time: to_u32(chapter.end_offset_ms)?,
        start_offset: CHAP_NO_OFFSET,
        end_offset: CHAP_NO_OFFSET,
        frames,
    }))
}

fn toc_frame(chapters: &[Chapter]) -> Result<Frame> {
    if chapters.len() > MAX_TOC_ENTRIES {
        return Err(RelivError::Tagging(format!(
            "{} chapters do not fit in a table of contents (max {MAX_TOC_ENTRIES})",
            chapters.len()
        )));
    }

    Ok(Frame::from(TableOfContents {
        element_id: TOC_ELEMENT_ID.to_string(),
        top_level: true,
        ordered: true,
        elements: chapters.iter().map(|c| c.id.clone()).collect(),
        frames: vec![text_frame("TIT2", TOC_TITLE)],
    }))
}
