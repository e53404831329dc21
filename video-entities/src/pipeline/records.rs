//! Warehouse rows and exported records.

use crate::entity_extraction::Entity;
use crate::warehouse::{Row, parse_timestamp};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One video row with its aggregated captions.
#[derive(Debug, Clone, PartialEq)]
pub struct DbVideo {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    /// JSON array of `{offset, caption}` objects, ordered by offset
    pub captions: Option<String>,
    pub video_updated: DateTime<Utc>,
    pub caption_updated: Option<DateTime<Utc>>,
}

/// A caption line. Videos without captions aggregate to a single empty object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DbCaption {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl DbVideo {
    /// Decode a row of `(video_id, video_title, description, captions,
    /// video_updated, caption_updated)`.
    pub fn from_row(row: Row) -> Result<Self> {
        if row.len() < 6 {
            return Err(Error::MalformedData(format!(
                "expected 6 columns, got {}",
                row.len()
            )));
        }
        let mut values = row.into_iter();
        let mut next = move || values.next().flatten();

        let video_id = next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::MalformedData("row has no video_id".to_string()))?;
        let title = next().unwrap_or_default();
        let description = next();
        let captions = next();
        let video_updated = next().ok_or_else(|| {
            Error::MalformedData(format!("video {} has no updated timestamp", video_id))
        })?;
        let video_updated = parse_timestamp(&video_updated)?;
        let caption_updated = next().map(|v| parse_timestamp(&v)).transpose()?;

        Ok(Self {
            video_id,
            title,
            description,
            captions,
            video_updated,
            caption_updated,
        })
    }

    /// Parse the caption array. A missing array means no captions.
    pub fn captions(&self) -> Result<Vec<DbCaption>> {
        match self.captions.as_deref() {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                Error::MalformedData(format!(
                    "captions for video {} are not a caption array: {}",
                    self.video_id, e
                ))
            }),
        }
    }
}

/// A caption paired with the video it belongs to.
#[derive(Debug, Clone)]
pub struct VideoCaption<'a> {
    pub video: &'a DbVideo,
    pub caption: DbCaption,
}

/// Which text of a video the entities came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Part {
    Title,
    Description,
    Caption,
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Part::Title => write!(f, "title"),
            Part::Description => write!(f, "description"),
            Part::Caption => write!(f, "caption"),
        }
    }
}

/// One exported line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEntity {
    pub video_id: String,
    pub part: Part,
    /// Caption offset in seconds; `None` for titles and descriptions
    pub offset: Option<i64>,
    pub entities: Vec<Entity>,
    pub video_updated: DateTime<Utc>,
    pub caption_updated: Option<DateTime<Utc>>,
    /// When the entities were extracted
    pub updated: DateTime<Utc>,
}

impl VideoEntity {
    fn new(
        video: &DbVideo,
        part: Part,
        offset: Option<i64>,
        entities: Vec<Entity>,
        updated: DateTime<Utc>,
    ) -> Self {
        Self {
            video_id: video.video_id.clone(),
            part,
            offset,
            entities,
            video_updated: video.video_updated,
            caption_updated: video.caption_updated,
            updated,
        }
    }
}

/// Build the records of one page: every title, then every description, then
/// the caption lines that have an offset or at least one entity.
pub fn assemble(
    videos: &[DbVideo],
    titles: Vec<Vec<Entity>>,
    descriptions: Vec<Vec<Entity>>,
    captions: &[VideoCaption<'_>],
    caption_entities: Vec<Vec<Entity>>,
    updated: DateTime<Utc>,
) -> Vec<VideoEntity> {
    let title_rows = videos
        .iter()
        .zip(titles)
        .map(|(video, entities)| VideoEntity::new(video, Part::Title, None, entities, updated));

    let description_rows = videos.iter().zip(descriptions).map(|(video, entities)| {
        VideoEntity::new(video, Part::Description, None, entities, updated)
    });

    let caption_rows = captions
        .iter()
        .zip(caption_entities)
        .filter(|(c, entities)| c.caption.offset.is_some() || !entities.is_empty())
        .map(|(c, entities)| {
            VideoEntity::new(c.video, Part::Caption, c.caption.offset, entities, updated)
        });

    title_rows
        .chain(description_rows)
        .chain(caption_rows)
        .collect()
}
