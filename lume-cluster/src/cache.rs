//! On-disk cache of baked meshes, stored as JSON next to the source file.
//!
//! A cache file is valid as long as it exists: editing the source mesh does
//! not invalidate it, bumping [`CACHE_VERSION`] does.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::geometry::BakedMesh;

pub const CACHE_VERSION: u32 = 1;

/// `<source>.v<CACHE_VERSION>.json`
pub fn cache_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(format!(".v{}.json", CACHE_VERSION));
    PathBuf::from(name)
}

/// Returns `Ok(None)` when no cache file exists. A file that exists but
/// cannot be parsed or fails validation is an error, never a miss.
pub fn try_load(source: &Path) -> Result<Option<BakedMesh>> {
    let path = cache_path(source);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("no cache at {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to open cache file: {}", path.display())),
    };

    let baked: BakedMesh = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Corrupted cache file: {}", path.display()))?;
    baked.validate().with_context(|| format!("Corrupted cache file: {}", path.display()))?;
    Ok(Some(baked))
}

/// Writes the cache unless one already exists. Returns whether a file was written.
pub fn try_save(source: &Path, baked: &BakedMesh) -> Result<bool> {
    let path = cache_path(source);
    if path.exists() {
        debug!("cache {} already present, not overwriting", path.display());
        return Ok(false);
    }

    // 先写临时文件再改名，避免中断后留下半个缓存
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp).with_context(|| format!("Failed to create cache file: {}", tmp.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, baked).context("Failed to serialize baked mesh")?;
    writer.flush().with_context(|| format!("Failed to write cache file: {}", tmp.display()))?;
    drop(writer);

    fs::rename(&tmp, &path).with_context(|| format!("Failed to move cache file into place: {}", path.display()))?;
    info!("cached {} ({} clusters)", path.display(), baked.clusters.len());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_appends_version() {
        let path = cache_path(Path::new("assets/bunny.obj"));
        assert_eq!(path, PathBuf::from(format!("assets/bunny.obj.v{}.json", CACHE_VERSION)));
    }

    #[test]
    fn missing_cache_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(try_load(&dir.path().join("nothing.obj")).unwrap().is_none());
    }
}
