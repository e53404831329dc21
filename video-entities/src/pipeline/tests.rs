use super::*;
use crate::Error;
use crate::entity_extraction::{RawSpan, TokenClassifier};
use crate::storage::{MockBlobStore, StorageError};
use crate::warehouse::{self, Row, WarehouseError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct KeywordClassifier;

impl TokenClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> crate::Result<Vec<RawSpan>> {
        let mut spans = Vec::new();
        for (word, label) in [("Obama", "PERSON"), ("Google", "ORG"), ("2020", "DATE")] {
            if let Some(start) = text.find(word) {
                spans.push(RawSpan::new(word, label, start, start + word.len()));
            }
        }
        Ok(spans)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

#[derive(Debug, Default)]
struct WarehouseLog {
    queries: Vec<String>,
    cursors_closed: usize,
    closed: bool,
}

struct FakeWarehouse {
    batches: Mutex<VecDeque<Vec<Row>>>,
    log: Arc<Mutex<WarehouseLog>>,
    fail_query: bool,
}

impl FakeWarehouse {
    fn new(batches: Vec<Vec<Row>>) -> (Box<Self>, Arc<Mutex<WarehouseLog>>) {
        let log = Arc::new(Mutex::new(WarehouseLog::default()));
        let warehouse = Self {
            batches: Mutex::new(batches.into()),
            log: log.clone(),
            fail_query: false,
        };
        (Box::new(warehouse), log)
    }

    fn failing() -> (Box<Self>, Arc<Mutex<WarehouseLog>>) {
        let (mut warehouse, log) = Self::new(Vec::new());
        warehouse.fail_query = true;
        (warehouse, log)
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn query(&self, sql: &str) -> warehouse::Result<Box<dyn RowCursor>> {
        self.log.lock().unwrap().queries.push(sql.to_string());
        if self.fail_query {
            return Err(WarehouseError::Query {
                code: "002003".to_string(),
                message: "Object 'CAPTION' does not exist".to_string(),
            });
        }
        let rows = self.batches.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(FakeCursor {
            total: rows.len(),
            rows: rows.into(),
            log: self.log.clone(),
        }))
    }

    async fn close(&self) -> warehouse::Result<()> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

struct FakeCursor {
    total: usize,
    rows: VecDeque<Row>,
    log: Arc<Mutex<WarehouseLog>>,
}

#[async_trait]
impl RowCursor for FakeCursor {
    fn row_count(&self) -> usize {
        self.total
    }

    async fn fetch_many(&mut self, n: usize) -> warehouse::Result<Vec<Row>> {
        let take = n.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    async fn close(&mut self) -> warehouse::Result<()> {
        self.log.lock().unwrap().cursors_closed += 1;
        Ok(())
    }
}

fn row(id: &str, title: &str, description: Option<&str>, captions: &str) -> Row {
    vec![
        Some(id.to_string()),
        Some(title.to_string()),
        description.map(str::to_string),
        Some(captions.to_string()),
        Some("1600000000.000000000".to_string()),
        Some("1600000500.000000000".to_string()),
    ]
}

/// Video `a` has captions, video `b` has none.
fn two_videos() -> Vec<Row> {
    vec![
        row(
            "a",
            "Obama at Google",
            Some("filmed in 2020"),
            r#"[{"offset":0,"caption":"Obama speaks"},{"offset":5,"caption":"nothing here"},{"caption":"no offset"}]"#,
        ),
        row("b", "cooking", None, "[{}]"),
    ]
}

fn local_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.local_dir = Some(dir.to_path_buf());
    config
}

fn pipeline(config: AppConfig, blob: MockBlobStore) -> VideoEntitiesPipeline {
    let extractor = EntityExtractor::new(Arc::new(KeywordClassifier)).with_workers(2);
    VideoEntitiesPipeline::new(config, extractor, Box::new(blob))
}

fn no_uploads() -> MockBlobStore {
    let mut blob = MockBlobStore::new();
    blob.expect_save_file().never();
    blob
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

#[tokio::test]
async fn test_two_videos_produce_title_description_and_caption_records() {
    let dir = tempfile::tempdir().unwrap();
    let (warehouse, log) = FakeWarehouse::new(vec![two_videos()]);

    let summary = pipeline(local_config(dir.path()), no_uploads())
        .run(warehouse, &ids(&["a", "b"]))
        .await
        .unwrap();

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.videos, 2);
    assert_eq!(summary.files.len(), 1);
    assert!(summary.files[0].starts_with(dir.path().join("video_entities")));

    let records = writer::read_page(&summary.files[0]).unwrap();
    assert_eq!(summary.records, records.len());
    let parts: Vec<(&str, Part, Option<i64>)> = records
        .iter()
        .map(|r| (r.video_id.as_str(), r.part, r.offset))
        .collect();
    assert_eq!(
        parts,
        vec![
            ("a", Part::Title, None),
            ("b", Part::Title, None),
            ("a", Part::Description, None),
            ("b", Part::Description, None),
            ("a", Part::Caption, Some(0)),
            ("a", Part::Caption, Some(5)),
        ]
    );

    let names: Vec<Vec<&str>> = records
        .iter()
        .map(|r| r.entities.iter().map(|e| e.name.as_str()).collect())
        .collect();
    assert_eq!(names[0], vec!["Obama", "Google"]);
    // DATE is excluded
    assert!(names[2].is_empty());
    assert_eq!(names[4], vec!["Obama"]);

    let updated = records[0].updated;
    assert!(records.iter().all(|r| r.updated == updated));
    assert_eq!(records[0].video_updated.timestamp(), 1_600_000_000);
    assert_eq!(records[0].caption_updated.map(|t| t.timestamp()), Some(1_600_000_500));

    let log = log.lock().unwrap();
    assert_eq!(log.queries.len(), 1);
    assert!(log.queries[0].contains("where video_id in ('a','b')"));
    assert_eq!(log.cursors_closed, 1);
    assert!(log.closed);
}

#[tokio::test]
async fn test_run_state_paths_issue_one_batch_each() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = local_config(dir.path());
    config.state.video_paths = Some(ids(&["2021/01.jsonl.gz", "2021/02.jsonl.gz"]));
    let (warehouse, log) = FakeWarehouse::new(vec![
        vec![row("a", "Obama", None, "[{}]")],
        vec![row("b", "Google", None, "[{}]")],
    ]);

    let summary = pipeline(config, no_uploads())
        .run(warehouse, &ids(&["ignored"]))
        .await
        .unwrap();

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.files.len(), 2);
    let log = log.lock().unwrap();
    assert_eq!(log.queries.len(), 2);
    assert!(log.queries[0].contains("@public.yt_data/2021/01.jsonl.gz"));
    assert!(log.queries[1].contains("@public.yt_data/2021/02.jsonl.gz"));
    assert_eq!(log.cursors_closed, 2);
}

#[tokio::test]
async fn test_pages_follow_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = local_config(dir.path());
    config.data_scripts.spacy_batch_size = 1;
    let (warehouse, _) = FakeWarehouse::new(vec![two_videos()]);

    let summary = pipeline(config, no_uploads())
        .run(warehouse, &ids(&["a", "b"]))
        .await
        .unwrap();

    assert_eq!(summary.files.len(), 2);
    assert_eq!(summary.videos, 2);
    let second = writer::read_page(&summary.files[1]).unwrap();
    assert!(second.iter().all(|r| r.video_id == "b"));
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn test_nothing_to_process_still_closes_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (warehouse, log) = FakeWarehouse::new(Vec::new());

    let summary = pipeline(local_config(dir.path()), no_uploads())
        .run(warehouse, &[])
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::default());
    let log = log.lock().unwrap();
    assert!(log.queries.is_empty());
    assert!(log.closed);
}

#[tokio::test]
async fn test_pages_are_uploaded_without_local_dir() {
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let recorded = uploads.clone();
    let mut blob = MockBlobStore::new();
    blob.expect_save_file()
        .times(1)
        .withf(|local, _| local.exists())
        .returning(move |_, remote| {
            recorded.lock().unwrap().push(remote.to_string());
            Ok(())
        });
    let (warehouse, _) = FakeWarehouse::new(vec![two_videos()]);
    let temp = tempfile::tempdir().unwrap();

    let summary = pipeline(AppConfig::default(), blob)
        .with_temp_root(temp.path())
        .run(warehouse, &ids(&["a", "b"]))
        .await
        .unwrap();

    let local_file = &summary.files[0];
    let file_name = local_file.file_name().unwrap().to_string_lossy().to_string();
    assert_eq!(
        *uploads.lock().unwrap(),
        vec![format!("db2/video_entities/{}", file_name)]
    );
    assert!(local_file.starts_with(temp.path().join("data_scripts").join("video_entities")));
    // the local copy stays after upload
    assert!(local_file.exists());
}

#[tokio::test]
async fn test_upload_failure_keeps_local_file_and_closes_connection() {
    let mut blob = MockBlobStore::new();
    blob.expect_save_file().times(1).returning(|_, _| {
        Err(StorageError::Upload {
            status: 403,
            message: "AuthenticationFailed".to_string(),
        })
    });
    let (warehouse, log) = FakeWarehouse::new(vec![two_videos()]);
    let temp = tempfile::tempdir().unwrap();
    let pipeline = pipeline(AppConfig::default(), blob).with_temp_root(temp.path());

    let err = pipeline.run(warehouse, &ids(&["a", "b"])).await.unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    let log = log.lock().unwrap();
    assert!(log.closed);
    assert_eq!(log.cursors_closed, 1);

    let written: Vec<_> = std::fs::read_dir(pipeline.local_path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(written.len(), 1);
    assert!(pipeline.local_path().starts_with(temp.path()));
}

#[tokio::test]
async fn test_query_failure_closes_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (warehouse, log) = FakeWarehouse::failing();

    let err = pipeline(local_config(dir.path()), no_uploads())
        .run(warehouse, &ids(&["a"]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Warehouse(ref msg) if msg.contains("002003")));
    assert!(log.lock().unwrap().closed);
}

#[tokio::test]
async fn test_malformed_captions_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (warehouse, log) = FakeWarehouse::new(vec![vec![row("a", "Obama", None, "not json")]]);

    let err = pipeline(local_config(dir.path()), no_uploads())
        .run(warehouse, &ids(&["a"]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MalformedData(_)));
    let log = log.lock().unwrap();
    assert_eq!(log.cursors_closed, 1);
    assert!(log.closed);
}

#[test]
fn test_local_path() {
    let local = pipeline(local_config(Path::new("/data/out")), no_uploads());
    assert_eq!(local.local_path(), PathBuf::from("/data/out/video_entities"));

    let temp = pipeline(AppConfig::default(), no_uploads());
    assert_eq!(
        temp.local_path(),
        std::env::temp_dir().join("data_scripts").join("video_entities")
    );

    let scratch = temp.with_temp_root(Path::new("/scratch"));
    assert_eq!(
        scratch.local_path(),
        PathBuf::from("/scratch/data_scripts/video_entities")
    );
}
