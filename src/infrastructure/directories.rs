use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::config::DirectoryConfig;

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub logs_dir: PathBuf,
    pub inbox_dir: PathBuf,
    pub processing_dir: PathBuf,
    pub outbox_dir: PathBuf,
}

pub fn ensure_directories(cfg: &DirectoryConfig) -> Result<ResolvedPaths> {
    let logs_dir = ensure_dir(Path::new(&cfg.logs_dir))?;
    let data_dir = ensure_dir(Path::new(&cfg.data_dir))?;
    let inbox_dir = ensure_dir(&data_dir.join("inbox"))?;
    let processing_dir = ensure_dir(&data_dir.join("processing"))?;
    let outbox_dir = ensure_dir(&data_dir.join("outbox"))?;

    let check_file = outbox_dir.join(".write-test");
    fs::write(&check_file, b"ok")
        .with_context(|| format!("outbox {} is not writable", outbox_dir.display()))?;
    fs::remove_file(&check_file)?;

    Ok(ResolvedPaths {
        logs_dir,
        inbox_dir,
        processing_dir,
        outbox_dir,
    })
}

fn ensure_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(dir) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o755);
            let _ = fs::set_permissions(dir, perms);
        }
    }
    Ok(dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf()))
}
