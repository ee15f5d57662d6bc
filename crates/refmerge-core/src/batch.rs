use crate::request::{MergeRequest, MergeResponse};
use std::path::{Path, PathBuf};
use tokio::fs;

/// A directory of merge requests.
///
/// Requests are JSON files dropped into `incoming/`. A worker claims one by
/// renaming it into `processing/`, then writes the response to `outgoing/`.
/// Files that cannot be parsed are moved to `failed/`.
pub struct BatchDir {
    pub incoming: PathBuf,
    pub processing: PathBuf,
    pub outgoing: PathBuf,
    pub failed: PathBuf,
}

impl BatchDir {
    pub async fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        let incoming = base.join("incoming");
        let processing = base.join("processing");
        let outgoing = base.join("outgoing");
        let failed = base.join("failed");

        fs::create_dir_all(&incoming).await?;
        fs::create_dir_all(&processing).await?;
        fs::create_dir_all(&outgoing).await?;
        fs::create_dir_all(&failed).await?;

        Ok(Self {
            incoming,
            processing,
            outgoing,
            failed,
        })
    }

    /// Write a request into incoming/. Uses tmp+rename for atomicity.
    pub async fn enqueue(&self, request: &MergeRequest) -> anyhow::Result<PathBuf> {
        let filename = format!("{}.json", request.request_id);
        let path = self.incoming.join(&filename);
        write_atomic(&self.incoming, &filename, &serde_json::to_string_pretty(request)?).await?;
        Ok(path)
    }

    /// Claim the next request (FIFO by modification time) by moving it from
    /// incoming/ to processing/. Unparseable files go to failed/.
    pub async fn claim_next(&self) -> anyhow::Result<Option<(PathBuf, MergeRequest)>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.incoming).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Ok(meta) = entry.metadata().await {
                    if let Ok(modified) = meta.modified() {
                        entries.push((path, modified));
                    }
                }
            }
        }

        // Oldest first
        entries.sort_by_key(|(_, t)| *t);

        for (path, _) in entries {
            let filename = match path.file_name() {
                Some(f) => f.to_owned(),
                None => continue,
            };

            // Skip temp files
            if filename.to_string_lossy().starts_with('.') {
                continue;
            }

            let processing_path = self.processing.join(&filename);
            if fs::rename(&path, &processing_path).await.is_err() {
                // Claimed by someone else
                continue;
            }

            let parsed = match fs::read_to_string(&processing_path).await {
                Ok(content) => serde_json::from_str::<MergeRequest>(&content).map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(request) => return Ok(Some((processing_path, request))),
                Err(e) => {
                    tracing::error!(
                        "Failed to load request {}: {}",
                        filename.to_string_lossy(),
                        e
                    );
                    self.fail(&processing_path).await?;
                }
            }
        }

        Ok(None)
    }

    /// Write the response to outgoing/ and clean up the processing file.
    pub async fn complete(
        &self,
        processing_path: &Path,
        response: &MergeResponse,
    ) -> anyhow::Result<PathBuf> {
        let filename = format!("{}.json", response.request_id);
        let content = serde_json::to_string_pretty(response)?;
        write_atomic(&self.outgoing, &filename, &content).await?;
        fs::remove_file(processing_path).await?;
        Ok(self.outgoing.join(filename))
    }

    /// Move a request back to incoming/ so a later run picks it up again.
    pub async fn retry(&self, processing_path: &Path) -> anyhow::Result<()> {
        if let Some(filename) = processing_path.file_name() {
            fs::rename(processing_path, self.incoming.join(filename)).await?;
        }
        Ok(())
    }

    /// Move a request that cannot be processed to failed/.
    pub async fn fail(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(filename) = path.file_name() {
            fs::rename(path, self.failed.join(filename)).await?;
        }
        Ok(())
    }
}

async fn write_atomic(dir: &Path, filename: &str, content: &str) -> anyhow::Result<()> {
    let tmp = dir.join(format!(".{}.tmp", filename));
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, dir.join(filename)).await?;
    Ok(())
}
