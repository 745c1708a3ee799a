use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::TaskChain;
use crate::error::{CurriculumError, Result};

const MAX_SLUG_CHARS: usize = 40;

/// Filesystem-safe prefix derived from an objective. Letters, digits and CJK
/// are kept; every other run of characters becomes one `_`.
pub fn objective_slug(objective: &str) -> String {
    let mut slug = String::new();
    let mut pending_sep = false;
    for c in objective.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
        if slug.chars().count() >= MAX_SLUG_CHARS {
            break;
        }
    }
    if slug.is_empty() {
        "chain".to_string()
    } else {
        slug
    }
}

/// Write-once store of task chain artifacts, one JSON file per chain.
pub struct ChainRepository {
    dir: PathBuf,
}

impl ChainRepository {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, chain: &TaskChain) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", objective_slug(&chain.target_objective), chain.chain_id))
    }

    /// Persist `chain`. An existing artifact is never overwritten.
    pub async fn save(&self, chain: &TaskChain) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(chain);
        let json = serde_json::to_vec_pretty(chain)?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CurriculumError::ArtifactExists(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&json).await?;
        file.flush().await?;

        log::info!("Saved task chain {} ({} nodes) to {}", chain.chain_id, chain.nodes.len(), path.display());
        Ok(path)
    }
}

pub async fn load_chain<P: AsRef<Path>>(path: P) -> Result<TaskChain> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
