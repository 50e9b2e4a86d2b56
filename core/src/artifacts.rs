//! Versioned JSON artifact store.
//!
//! RULE: Only this module touches artifact files. Detectors hand it
//! serializable values and a family name; it owns naming, atomic writes
//! and the not-found mapping.
//!
//! File names: `{family}_v{version}.json`. Writes go to a `.tmp` sibling
//! first and are renamed into place, so a reader never sees half a file.

use crate::error::{RiskError, RiskResult};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> RiskResult<Self> {
        let root = dir.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, family: &str, version: &str) -> PathBuf {
        self.root.join(format!("{family}_v{version}.json"))
    }

    pub fn exists(&self, family: &str, version: &str) -> bool {
        self.path_for(family, version).is_file()
    }

    pub fn put<T: Serialize>(&self, family: &str, version: &str, value: &T) -> RiskResult<PathBuf> {
        let path = self.path_for(family, version);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(value)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        log::debug!("artifacts: wrote {}", path.display());
        Ok(path)
    }

    pub fn get<T: DeserializeOwned>(&self, family: &str, version: &str) -> RiskResult<T> {
        let path = self.path_for(family, version);
        let body = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RiskError::ArtifactNotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fail with ArtifactNotFound naming the first missing family.
    pub fn require(&self, families: &[&str], version: &str) -> RiskResult<()> {
        match families.iter().find(|f| !self.exists(f, version)) {
            Some(f) => Err(RiskError::ArtifactNotFound {
                path: self.path_for(f, version).display().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Versions for which `family` has an artifact, sorted.
    pub fn versions(&self, family: &str) -> RiskResult<Vec<String>> {
        let prefix = format!("{family}_v");
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(v) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                out.push(v.to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}
