//! Recipe injection and build context packing.

use bytes::Bytes;
use dockyard_core::{Error, Language, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::OpenOptions;
use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::archive;

/// Name of the recipe file injected at the root of every build context.
pub const RECIPE_FILE: &str = "Dockerfile";

/// Turns uploaded archives into build contexts for a language.
#[derive(Debug, Clone)]
pub struct ContextPreparer {
    recipe_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
}

impl ContextPreparer {
    /// Create a preparer reading recipes from `<recipe_dir>/<language>/Dockerfile`.
    pub fn new(recipe_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipe_dir: recipe_dir.into(),
            scratch_dir: None,
        }
    }

    /// Create working directories under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn recipe_path(&self, language: Language) -> PathBuf {
        self.recipe_dir.join(language.as_str()).join(RECIPE_FILE)
    }

    /// Convert an uploaded archive into a plain tar stream.
    pub fn normalize(&self, buffer: &[u8]) -> Result<Vec<u8>> {
        archive::normalize(buffer)
    }

    /// Unpack `tar`, inject the language recipe and re-pack it gzip-compressed.
    ///
    /// Runs on the blocking pool. The working directory is removed whether
    /// or not preparation succeeds.
    pub async fn prepare_for_language(&self, language: Language, tar: Vec<u8>) -> Result<Bytes> {
        let recipe = self.recipe_path(language);
        let scratch = self.scratch_dir.clone();

        tokio::task::spawn_blocking(move || prepare_blocking(&recipe, scratch.as_deref(), &tar))
            .await
            .map_err(|e| Error::Preparation(format!("preparation task failed: {}", e)))?
    }

    /// Normalize an upload and prepare it for `language` in one step.
    pub async fn prepare(&self, language: Language, buffer: &[u8]) -> Result<Bytes> {
        let tar = self.normalize(buffer)?;
        self.prepare_for_language(language, tar).await
    }
}

fn prepare_blocking(recipe: &Path, scratch: Option<&Path>, tar: &[u8]) -> Result<Bytes> {
    if !recipe.is_file() {
        return Err(Error::Preparation(format!(
            "missing build recipe {}",
            recipe.display()
        )));
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix("dockyard-context-");
    let workdir = match scratch {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .map_err(|e| Error::Preparation(format!("failed to create working directory: {}", e)))?;

    unpack(tar, workdir.path())?;

    inject_recipe(recipe, &workdir.path().join(RECIPE_FILE))?;

    let context = pack(workdir.path())?;
    debug!(
        workdir = %workdir.path().display(),
        bytes = context.len(),
        "Prepared build context"
    );
    Ok(Bytes::from(context))
}

/// Replace whatever the upload put at `target` with a fresh copy of `recipe`.
///
/// The existing entry is removed without being followed, so a submitted
/// symlink cannot redirect the write.
fn inject_recipe(recipe: &Path, target: &Path) -> Result<()> {
    let inject_err = |e: std::io::Error| {
        Error::Preparation(format!("failed to inject recipe {}: {}", recipe.display(), e))
    };

    match std::fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(target).map_err(inject_err)?,
        Ok(_) => std::fs::remove_file(target).map_err(inject_err)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(inject_err(e)),
    }

    let contents = std::fs::read(recipe).map_err(inject_err)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(inject_err)?;
    file.write_all(&contents).map_err(inject_err)
}

/// Links must stay relative and must not climb out of their directory.
fn check_link(entry: &tar::Entry<'_, Cursor<&[u8]>>, path: &str) -> Result<()> {
    let kind = entry.header().entry_type();
    if !kind.is_symlink() && !kind.is_hard_link() {
        return Ok(());
    }

    let target = entry
        .link_name()
        .map_err(|e| Error::Preparation(format!("unreadable link target for {}: {}", path, e)))?
        .ok_or_else(|| Error::Preparation(format!("link {} has no target", path)))?;
    let escapes = target
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(Error::Preparation(format!(
            "link {} -> {} escapes the build context",
            path,
            target.display()
        )));
    }
    Ok(())
}

fn unpack(tar: &[u8], dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(Cursor::new(tar));
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|e| Error::Preparation(format!("failed to read archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::Preparation(format!("failed to read archive entry: {}", e)))?;
        let path = entry
            .path()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        check_link(&entry, &path)?;

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| Error::Preparation(format!("failed to unpack {}: {}", path, e)))?;
        if !unpacked {
            return Err(Error::Preparation(format!(
                "archive entry {} escapes the build context",
                path
            )));
        }
    }
    Ok(())
}

fn pack(dir: &Path) -> Result<Vec<u8>> {
    let pack_err = |e: std::io::Error| Error::Preparation(format!("failed to pack context: {}", e));

    let mut children: Vec<_> = std::fs::read_dir(dir)
        .map_err(pack_err)?
        .collect::<std::io::Result<_>>()
        .map_err(pack_err)?;
    children.sort_by_key(|entry| entry.file_name());

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for child in children {
        let name = child.file_name();
        let file_type = child.file_type().map_err(pack_err)?;
        if file_type.is_dir() {
            builder
                .append_dir_all(&name, child.path())
                .map_err(pack_err)?;
        } else {
            builder
                .append_path_with_name(child.path(), &name)
                .map_err(pack_err)?;
        }
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(pack_err)
}
