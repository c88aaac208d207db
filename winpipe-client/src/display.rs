//! Headless display: reports window contents and dumps them to disk.
//!
//! Painting happens in the core's [`Surface`](winpipe_core::Surface); this
//! module decides what becomes of a surface once a window goes away.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use winpipe_core::{ClientWindow, PipelineError};

pub struct Display {
    dump_dir: Option<PathBuf>,
}

impl Display {
    pub fn new(dump_dir: Option<PathBuf>) -> Self {
        Self { dump_dir }
    }

    pub fn dump_dir(&self) -> Option<&Path> {
        self.dump_dir.as_deref()
    }

    /// Log a window after a batch of paints.
    pub fn present(&self, window: &ClientWindow) {
        let (width, height) = window.surface().size();
        debug!(
            wid = window.wid(),
            width,
            height,
            paints = window.surface().paints(),
            "window updated"
        );
    }

    /// A window is gone: log its final state and dump it if configured.
    ///
    /// Returns the path written, if any.
    pub fn retire(&self, window: &ClientWindow) -> Option<PathBuf> {
        let surface = window.surface();
        info!(
            wid = window.wid(),
            paints = surface.paints(),
            checksum = %surface.checksum(),
            "window retired"
        );
        let dir = self.dump_dir.as_deref()?;
        match dump(dir, window) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(wid = window.wid(), error = %e, "window dump failed");
                None
            }
        }
    }
}

/// Path a window is dumped to inside `dir`.
pub fn dump_path(dir: &Path, window: &ClientWindow) -> PathBuf {
    dir.join(format!("window-{}.png", window.wid()))
}

fn dump(dir: &Path, window: &ClientWindow) -> Result<PathBuf, PipelineError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        PipelineError::EncodeFailed(format!("cannot create {}: {e}", dir.display()))
    })?;
    let path = dump_path(dir, window);
    window.surface().dump_png(&path)?;
    info!(wid = window.wid(), path = %path.display(), "window dumped");
    Ok(path)
}
