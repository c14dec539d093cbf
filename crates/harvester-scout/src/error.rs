use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },
    #[error(transparent)]
    Pipeline(#[from] harvester_pipeline::PipelineError),
    #[error(transparent)]
    Harvest(#[from] harvester_common::HarvestError),
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
