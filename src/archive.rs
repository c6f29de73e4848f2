//! Folder download as a zip archive.
//!
//! The archive is written straight into the output sink while the folder is
//! walked, one file open at a time, so memory use does not grow with the
//! size of the folder.

use crate::error::{Result, StoreError};
use actix_web::web::Bytes;
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path};
use tokio::sync::mpsc;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CHUNK_SIZE: usize = 64 * 1024;
const ZIP32_LIMIT: u64 = u32::MAX as u64;

/// Fails with `NotFound` or `NotADirectory` unless `folder` is a directory.
pub fn check_folder(folder: &Path) -> Result<()> {
    let metadata = fs::metadata(folder).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(folder.display().to_string()),
        _ => StoreError::Io(e),
    })?;
    if !metadata.is_dir() {
        return Err(StoreError::NotADirectory(folder.display().to_string()));
    }
    Ok(())
}

/// Writes every regular file below `folder` into a zip archive on `sink`.
///
/// Entry names are relative to `folder` and `/`-separated; directories get
/// no entries of their own. Nothing is written when `folder` is missing or
/// not a directory. Any failure after that aborts the walk with
/// `StoreError::Archive`, possibly after part of the archive was written.
/// Files that resolve outside the canonical `boundary` through a link are
/// skipped. Returns the number of files archived.
pub fn stream_folder_as_archive<W: Write>(
    folder: &Path,
    boundary: &Path,
    sink: W,
) -> Result<usize> {
    check_folder(folder)?;

    let mut writer = ZipWriter::new_stream(sink);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut archived = 0;

    for entry in WalkDir::new(folder).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry_name(folder, entry.path())?;
        let canonical = entry
            .path()
            .canonicalize()
            .map_err(|e| archive_io(entry.path(), e))?;
        if !canonical.starts_with(boundary) {
            warn!("Skipping '{}': it links outside the storage directory", name);
            continue;
        }
        let size = entry.metadata()?.len();
        let mut file = File::open(entry.path()).map_err(|e| archive_io(entry.path(), e))?;

        debug!("Archiving '{}' ({} bytes)", name, size);
        writer.start_file(name, options.large_file(size >= ZIP32_LIMIT))?;
        io::copy(&mut file, &mut writer).map_err(|e| archive_io(entry.path(), e))?;
        archived += 1;
    }

    let mut sink = writer.finish()?;
    sink.flush().map_err(|e| archive_io(folder, e))?;
    Ok(archived)
}

fn entry_name(folder: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(folder).map_err(|_| {
        StoreError::Archive(format!(
            "'{}' is not below '{}'",
            path.display(),
            folder.display()
        ))
    })?;
    let segments: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(segments.join("/"))
}

fn archive_io(path: &Path, err: io::Error) -> StoreError {
    StoreError::Archive(format!("{}: {}", path.display(), err))
}

/// Suggested download name for a folder archive.
pub fn archive_file_name(folder_name: &str) -> String {
    let cleaned: String = folder_name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' | '/' => '_',
            _ => c,
        })
        .collect();
    if cleaned.is_empty() {
        "storage.zip".to_string()
    } else {
        format!("{}.zip", cleaned)
    }
}

/// Blocking [`Write`] adapter that forwards buffered chunks to a streaming
/// response body. A dropped receiver shows up as `BrokenPipe` on the next
/// chunk, which aborts the archive walk.
pub struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        ChannelSink {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(CHUNK_SIZE),
        ));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

impl Write for ChannelSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}
