//! Archive extraction via host tools.

use async_trait::async_trait;
use gameapd_commands::ArchiveExtractor;
use gameapd_common::{Error, Result};
use gameapd_executor::{Executor, ExecutorOptions, NullSink};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Extractor shelling out to the host's archive tools.
pub struct ToolExtractor {
    executor: Arc<dyn Executor>,
}

impl ToolExtractor {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    fn command_for(archive: &Path, dst: &Path) -> Result<String> {
        let name = archive.to_string_lossy();

        let command = if name.ends_with(".zip") {
            format!("unzip -o {} -d {}", name, dst.display())
        } else if name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
            || name.ends_with(".tar.xz") || name.ends_with(".tar.bz2")
        {
            format!("tar -xf {} -C {}", name, dst.display())
        } else {
            return Err(Error::validation(format!(
                "unsupported archive format: {name}"
            )));
        };

        Ok(command)
    }
}

#[async_trait]
impl ArchiveExtractor for ToolExtractor {
    async fn extract(&self, ctx: &CancellationToken, archive: &Path, dst: &Path) -> Result<()> {
        let command = Self::command_for(archive, dst)?;

        let code = self
            .executor
            .exec_with_writer(ctx, &command, &NullSink, ExecutorOptions::default())
            .await?;

        if code != 0 {
            return Err(Error::internal(format!(
                "extraction failed with code {code}"
            )));
        }

        Ok(())
    }
}
