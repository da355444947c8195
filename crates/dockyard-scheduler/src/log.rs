//! Compressed build logs.

use dockyard_core::engine::EngineEvent;
use dockyard_core::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// A gzip log receiving the output of one submission's pipeline.
///
/// Output is compressed in memory and written to disk by [`LogSink::close`],
/// or on drop if the sink is abandoned, so the runtime threads never block on
/// file I/O while a build streams.
pub struct LogSink {
    path: PathBuf,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl LogSink {
    /// Create (or truncate) the log file at `path`, creating parent directories.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Internal(format!("cannot create log directory {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::File::create(&path)
            .await
            .map_err(|e| Error::Internal(format!("cannot create log {}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
        })
    }

    pub fn write_event(&mut self, event: &EngineEvent) {
        self.write_raw(event.render().as_bytes());
    }

    pub fn write_line(&mut self, line: &str) {
        self.write_raw(line.as_bytes());
        if !line.ends_with('\n') {
            self.write_raw(b"\n");
        }
    }

    /// Write the `>>>>>>FAILED <STAGE><<<<<<` banner followed by the error.
    pub fn failure_banner(&mut self, stage: &str, error: &Error) {
        self.write_line(&format!(">>>>>>FAILED {}<<<<<<", stage.to_uppercase()));
        self.write_line(&error.to_string());
    }

    /// Finish the gzip stream and write it to disk.
    pub async fn close(mut self) -> Result<()> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        let close_err =
            |e: std::io::Error| Error::Internal(format!("cannot finish log {}: {}", self.path.display(), e));

        let compressed = encoder.finish().map_err(close_err)?;
        tokio::fs::write(&self.path, compressed)
            .await
            .map_err(close_err)
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        if let Some(encoder) = self.encoder.as_mut() {
            // writing into a Vec cannot fail
            let _ = encoder.write_all(bytes);
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        let Some(encoder) = self.encoder.take() else {
            return;
        };
        let path = self.path.clone();
        let persist = move || {
            let written = encoder
                .finish()
                .and_then(|compressed| std::fs::write(&path, compressed));
            if let Err(e) = written {
                warn!(path = %path.display(), error = %e, "Failed to finish abandoned build log");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(persist);
            }
            Err(_) => persist(),
        }
    }
}

/// Read a whole compressed log back as text.
#[cfg(test)]
pub(crate) fn read_log(path: &std::path::Path) -> Result<String> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let file = std::fs::File::open(path)
        .map_err(|e| Error::NotFound(format!("log {}: {}", path.display(), e)))?;
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .map_err(|e| Error::Internal(format!("corrupt log {}: {}", path.display(), e)))?;
    Ok(text)
}
