use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use std::time::Instant;
use tracing::info;

/// Drives a [`Pipeline`] through extract, transform and load.
pub struct ReportEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> ReportEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<String> {
        let started = Instant::now();
        info!("🚀 Starting protocol report run");

        // Extract
        info!("📄 Extracting protocol text...");
        let extracted = self.pipeline.extract().await?;
        info!(
            "📄 Extracted {} characters ({})",
            extracted.char_count(),
            extracted.metadata.extraction_method
        );

        // Transform
        info!("🔬 Analyzing protocol...");
        let outcome = self.pipeline.transform(extracted).await?;

        // Load
        info!("📦 Writing report...");
        let output_path = self.pipeline.load(outcome).await?;
        info!(
            "✅ Report written to {} in {:.1}s",
            output_path,
            started.elapsed().as_secs_f64()
        );

        Ok(output_path)
    }
}
