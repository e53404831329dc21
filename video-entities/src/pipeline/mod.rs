//! Batch export of video entities.
//!
//! A run is split into batches (one query each), and every batch is consumed
//! in pages of `spacyBatchSize` rows. Each page becomes one gzipped JSON Lines
//! file written locally and, unless a local directory override is set,
//! uploaded to blob storage.

mod records;
pub mod sql;
pub mod writer;

#[cfg(test)]
mod tests;

pub use records::{DbCaption, DbVideo, Part, VideoCaption, VideoEntity, assemble};

use crate::Result;
use crate::config::AppConfig;
use crate::entity_extraction::EntityExtractor;
use crate::storage::BlobStore;
use crate::warehouse::{RowCursor, Warehouse};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Blob folder receiving exported pages.
pub const BLOB_DIR: &str = "db2/video_entities";

/// Totals of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Query batches processed
    pub batches: usize,
    /// Video rows processed
    pub videos: usize,
    /// Records written
    pub records: usize,
    /// Local page files written, in order
    pub files: Vec<PathBuf>,
}

/// Progress through the batches of a run.
#[derive(Debug, Clone, Copy)]
struct BatchPosition {
    batch: usize,
    batch_total: usize,
}

/// Extracts entities for batches of videos and exports them.
pub struct VideoEntitiesPipeline {
    config: AppConfig,
    extractor: EntityExtractor,
    blob: Box<dyn BlobStore>,
    /// Parent of the `data_scripts` working directory used without a local override
    temp_root: PathBuf,
}

impl std::fmt::Debug for VideoEntitiesPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoEntitiesPipeline")
            .field("env", &self.config.env)
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

impl VideoEntitiesPipeline {
    pub fn new(config: AppConfig, extractor: EntityExtractor, blob: Box<dyn BlobStore>) -> Self {
        Self {
            config,
            extractor,
            blob,
            temp_root: std::env::temp_dir(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_temp_root(mut self, root: &Path) -> Self {
        self.temp_root = root.to_path_buf();
        self
    }

    /// Directory receiving page files.
    pub fn local_path(&self) -> PathBuf {
        let base = match &self.config.local_dir {
            Some(dir) => dir.clone(),
            None => self.temp_root.join("data_scripts"),
        };
        base.join("video_entities")
    }

    /// Process the staged run-state files, or `videos` when there are none.
    ///
    /// The warehouse connection is closed whether or not the run succeeds.
    /// Pages already written stay in place after a failure.
    pub async fn run(&self, warehouse: Box<dyn Warehouse>, videos: &[String]) -> Result<RunSummary> {
        let span = info_span!(
            "video_entities",
            run_id = %Uuid::new_v4(),
            env = %self.config.env,
            machine = self.config.machine.as_deref().unwrap_or_default(),
            db = %self.config.snowflake.db,
        );
        let result = self
            .run_batches(warehouse.as_ref(), videos)
            .instrument(span)
            .await;
        let closed = warehouse.close().await;

        match (result, closed) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "failed to close warehouse connection");
                Err(e)
            }
        }
    }

    async fn run_batches(&self, warehouse: &dyn Warehouse, videos: &[String]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let selects = sql::batch_selects(&self.config.state, videos);
        if selects.is_empty() {
            warn!("no video ids or run state paths given, nothing to process");
            return Ok(summary);
        }

        let local_path = self.local_path();
        tokio::fs::create_dir_all(&local_path).await?;

        let batch_total = selects.len();
        for (index, select) in selects.iter().enumerate() {
            let position = BatchPosition {
                batch: index + 1,
                batch_total,
            };
            let sql = sql::video_entities_sql(select);
            info!(
                batch = position.batch,
                batch_total,
                sql = %sql,
                "getting data for video file batch"
            );

            let mut cursor = warehouse.query(&sql).await?;
            let result = self
                .process_batch(cursor.as_mut(), position, &local_path, &mut summary)
                .await;
            let closed = cursor.close().await;
            result?;
            closed?;
            summary.batches += 1;
        }

        Ok(summary)
    }

    async fn process_batch(
        &self,
        cursor: &mut dyn RowCursor,
        position: BatchPosition,
        local_path: &Path,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let video_total = cursor.row_count();
        let page_size = self.config.data_scripts.spacy_batch_size;
        let mut video_count = 0;
        debug!(video_total, "processing entities");

        loop {
            let rows = cursor.fetch_many(page_size).await?;
            if rows.is_empty() {
                break;
            }
            video_count += rows.len();

            let videos = rows
                .into_iter()
                .map(DbVideo::from_row)
                .collect::<Result<Vec<_>>>()?;
            let records = self.page_records(&videos).await?;

            let file_name = writer::file_name(Utc::now());
            let local_file = local_path.join(&file_name);
            let record_count = writer::save_page(local_file.clone(), records).await?;

            let blob_file = self
                .config
                .local_dir
                .is_none()
                .then(|| format!("{}/{}", BLOB_DIR, file_name));
            if let Some(blob_file) = &blob_file {
                self.blob.save_file(&local_file, blob_file).await?;
            }

            let file = blob_file.unwrap_or_else(|| local_file.display().to_string());
            info!(
                file = %file,
                video_count,
                video_total,
                batch = position.batch,
                batch_total = position.batch_total,
                "saved page"
            );

            summary.videos += videos.len();
            summary.records += record_count;
            summary.files.push(local_file);
        }

        Ok(())
    }

    /// Extract entities for one page of videos.
    async fn page_records(&self, videos: &[DbVideo]) -> Result<Vec<VideoEntity>> {
        let titles = self
            .extractor
            .extract_batch(videos, |v| Some(v.title.as_str()))
            .await?;
        let descriptions = self
            .extractor
            .extract_batch(videos, |v| v.description.as_deref())
            .await?;

        let mut captions = Vec::new();
        for video in videos {
            for caption in video.captions()? {
                captions.push(VideoCaption { video, caption });
            }
        }
        let caption_entities = self
            .extractor
            .extract_batch(&captions, |c| c.caption.caption.as_deref())
            .await?;

        Ok(assemble(
            videos,
            titles,
            descriptions,
            &captions,
            caption_entities,
            Utc::now(),
        ))
    }
}
