use video_entities::prelude::*;

/// Pick the blob store for `config`: uploads are disabled when output stays local.
pub fn blob_store(config: &AppConfig) -> video_entities::Result<Box<dyn BlobStore>> {
    if config.local_dir.is_some() {
        return Ok(Box::new(DisabledBlobStore));
    }
    Ok(Box::new(AzureBlobStore::from_config(&config.storage)?))
}

/// Wire the concrete clients and run the export.
pub async fn run(config: AppConfig, videos: &[String]) -> video_entities::Result<RunSummary> {
    let data_scripts = config.data_scripts.clone();
    let extractor = tokio::task::spawn_blocking(move || EntityExtractor::from_config(&data_scripts))
        .await
        .map_err(|e| Error::Extraction(format!("model loading task failed: {}", e)))??;

    let blob = blob_store(&config)?;
    let warehouse = SnowflakeClient::connect(&config.snowflake)?;

    let pipeline = VideoEntitiesPipeline::new(config, extractor, blob);
    pipeline.run(Box::new(warehouse), videos).await
}
