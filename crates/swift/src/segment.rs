//! Segmented transfer engine.
//!
//! Objects larger than the configured segment size are stored as N
//! fixed-size segments in a shadow `<container>_segments` container,
//! tied together by a zero-byte manifest object whose
//! `x-object-manifest` header names the segment prefix. Every object
//! name under that prefix, in lexicographic order, is a segment of the
//! logical object; zero-padded segment numbering establishes that
//! order, not upload completion order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use md5::{Digest, Md5};
use tokio::io::AsyncWriteExt;

use st_core::{AbortFlag, DEFAULT_WIDTH, JobHandler, ReportSink, Result, WorkerPool};

use crate::connection::{BodySource, Connection};
use crate::protocol::{Headers, ObjectBody};

/// Suffix of the shadow container that keeps segments out of the main
/// container's listings.
pub const SEGMENT_SUFFIX: &str = "_segments";

/// MD5 of empty content; the ETag of every directory marker.
pub const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// One contiguous byte range of a segmented upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRange {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

/// Splits `total` bytes into ceil(total/segment_size) ranges.
pub fn plan_segments(total: u64, segment_size: u64) -> Vec<SegmentRange> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    let mut index = 0;
    while offset < total {
        let len = segment_size.min(total - offset);
        ranges.push(SegmentRange { index, offset, len });
        index += 1;
        offset += len;
    }
    ranges
}

pub fn segment_container(container: &str) -> String {
    format!("{container}{SEGMENT_SUFFIX}")
}

/// Name of one segment inside the segment container.
pub fn segment_name(object: &str, mtime: &str, total: u64, index: u64) -> String {
    format!("{object}/{mtime}/{total}/{index:08}")
}

/// The `x-object-manifest` value for a segmented upload:
/// `<container>_segments/<object>/<mtime>/<total-size>/`.
pub fn manifest_value(container: &str, object: &str, mtime: &str, total: u64) -> String {
    format!(
        "{}/{object}/{mtime}/{total}/",
        segment_container(container)
    )
}

/// Splits a manifest value into its segment container and prefix.
pub fn split_manifest(manifest: &str) -> Option<(&str, &str)> {
    manifest.split_once('/')
}

/// The manifest header of a fetched object, if it is a logical large
/// object.
pub fn manifest_of(headers: &Headers) -> Option<&str> {
    headers.get("x-object-manifest").map(String::as_str)
}

/// Work item for the segment pools: upload one byte range, or delete
/// one superseded segment.
pub struct SegmentJob {
    pub container: String,
    pub object: String,
    pub kind: SegmentKind,
    /// Progress line to emit once the job is done, when the caller
    /// wants one.
    pub log_line: Option<String>,
}

pub enum SegmentKind {
    Upload { path: PathBuf, offset: u64, len: u64 },
    Delete,
}

pub struct SegmentHandler {
    sink: ReportSink,
}

#[async_trait]
impl JobHandler for SegmentHandler {
    type Item = SegmentJob;
    type Session = Connection;

    async fn run(&self, job: SegmentJob, conn: &mut Connection) -> Result<()> {
        match job.kind {
            SegmentKind::Upload { path, offset, len } => {
                conn.put_object(
                    &job.container,
                    &job.object,
                    BodySource::File { path, offset, len },
                    None,
                    Headers::new(),
                )
                .await?;
            }
            SegmentKind::Delete => {
                conn.delete_object(&job.container, &job.object).await?;
            }
        }
        if let Some(line) = job.log_line {
            self.sink.progress(line);
        }
        Ok(())
    }
}

fn segment_pool(
    seed: &Connection,
    abort: &AbortFlag,
    sink: &ReportSink,
) -> WorkerPool<SegmentHandler> {
    let handler = Arc::new(SegmentHandler { sink: sink.clone() });
    let sessions = (0..DEFAULT_WIDTH).map(|_| seed.clone()).collect();
    WorkerPool::spawn(handler, sessions, abort.clone())
}

/// Uploads every segment of `path` through a dedicated pool. Each job
/// opens the file independently and sends exactly its slice. The
/// caller writes the manifest object once this returns.
#[allow(clippy::too_many_arguments)]
pub async fn upload_segments(
    seed: &Connection,
    abort: &AbortFlag,
    sink: &ReportSink,
    verbose: bool,
    container: &str,
    object: &str,
    path: &Path,
    mtime: &str,
    total: u64,
    segment_size: u64,
) -> Result<()> {
    let pool = segment_pool(seed, abort, sink);
    let segment_container = segment_container(container);
    for range in plan_segments(total, segment_size) {
        pool.submit(SegmentJob {
            container: segment_container.clone(),
            object: segment_name(object, mtime, total, range.index),
            kind: SegmentKind::Upload {
                path: path.to_path_buf(),
                offset: range.offset,
                len: range.len,
            },
            log_line: verbose.then(|| format!("{object} segment {}", range.index)),
        })
        .await;
    }
    pool.join().await
}

/// Deletes every object under a superseded manifest's prefix through a
/// dedicated pool. Callers invoke this only after the replacement
/// manifest (or the delete of the header object) is already live, so a
/// reader never sees a gap; a brief window of duplicate segments is
/// accepted.
pub async fn delete_manifest_segments(
    conn: &mut Connection,
    seed: &Connection,
    abort: &AbortFlag,
    sink: &ReportSink,
    manifest: &str,
    announce: bool,
) -> Result<()> {
    let Some((container, prefix)) = split_manifest(manifest) else {
        tracing::warn!(manifest, "malformed manifest header, nothing to clean up");
        return Ok(());
    };
    let (_, listing) = conn
        .get_container(container, None, None, Some(prefix), None, true)
        .await?;
    let names: Vec<String> = listing
        .iter()
        .filter_map(|entry| entry.as_object())
        .map(|record| record.name.clone())
        .collect();
    if names.is_empty() {
        return Ok(());
    }
    let pool = segment_pool(seed, abort, sink);
    for name in names {
        pool.submit(SegmentJob {
            log_line: announce.then(|| format!("{container}/{name}")),
            container: container.to_string(),
            object: name,
            kind: SegmentKind::Delete,
        })
        .await;
    }
    pool.join().await
}

/// Where a downloaded body goes.
pub enum Destination<'a> {
    /// Drain without writing (directory markers).
    Discard,
    Writer(&'a mut (dyn tokio::io::AsyncWrite + Unpin + Send)),
}

/// What was observed while draining a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub bytes_read: u64,
    /// Lowercase hex MD5 of the content. `None` for manifest objects,
    /// whose aggregate ETag is not comparable to a whole-body digest.
    pub digest: Option<String>,
}

/// Drains an object body into `dest`, hashing it unless the headers
/// mark it as a manifest.
pub async fn read_object_body(
    headers: &Headers,
    body: &mut ObjectBody,
    mut dest: Destination<'_>,
) -> Result<StreamSummary> {
    let mut hasher = manifest_of(headers).is_none().then(Md5::new);
    let mut bytes_read = 0u64;
    while let Some(chunk) = body.chunk().await? {
        bytes_read += chunk.len() as u64;
        if let Some(hasher) = &mut hasher {
            hasher.update(&chunk);
        }
        if let Destination::Writer(writer) = &mut dest {
            writer.write_all(&chunk).await?;
        }
    }
    if let Destination::Writer(writer) = &mut dest {
        writer.flush().await?;
    }
    Ok(StreamSummary {
        bytes_read,
        digest: hasher.map(|hasher| hex::encode(hasher.finalize())),
    })
}

/// End-to-end verification: digest against ETag, bytes read against
/// Content-Length. Mismatches are reported, not fatal.
pub fn integrity_errors(label: &str, headers: &Headers, summary: &StreamSummary) -> Vec<String> {
    let mut errors = Vec::new();
    if let (Some(digest), Some(etag)) = (&summary.digest, headers.get("etag"))
        && digest != etag
    {
        errors.push(format!("{label}: md5sum != etag, {digest} != {etag}"));
    }
    if let Some(content_length) = headers.get("content-length")
        && let Ok(content_length) = content_length.parse::<u64>()
        && summary.bytes_read != content_length
    {
        errors.push(format!(
            "{label}: read_length != content_length, {} != {content_length}",
            summary.bytes_read
        ));
    }
    errors
}
