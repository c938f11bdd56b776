//! upload command - Store files and directories
//!
//! Uploads the given files and directories into a container, walking
//! directories recursively. Files larger than the configured segment
//! size go up as parallel segments behind a manifest object; `--changed`
//! skips files the server already has.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use clap::Args;

use st_core::{AbortFlag, Error, JobHandler, ReportSink, Result, WorkerPool};
use st_swift::Connection;
use st_swift::connection::BodySource;
use st_swift::protocol::Headers;
use st_swift::segment::{self, EMPTY_MD5};

use crate::commands::{Ctx, fail, sessions, warn_container_slash};
use crate::exit_code::ExitCode;

/// Upload files and directories to a container
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Only upload files that have changed since the last upload
    #[arg(short = 'c', long = "changed")]
    pub changed: bool,

    /// Upload files in segments no larger than this many bytes, plus a
    /// manifest object that downloads as the original file; segments go
    /// to a <container>_segments container to keep the main listings
    /// clean
    #[arg(short = 'S', long = "segment-size")]
    pub segment_size: Option<u64>,

    /// Leave older segments of overwritten manifest objects alone
    #[arg(long)]
    pub leave_segments: bool,

    /// Container to upload into
    pub container: String,

    /// Files or directories to upload
    #[arg(required = true)]
    pub paths: Vec<String>,
}

struct UploadJob {
    /// Local path, which doubles as the object name once any leading
    /// `./` is stripped.
    path: String,
    dir_marker: bool,
}

struct UploadObjects {
    sink: ReportSink,
    verbose: bool,
    changed: bool,
    leave_segments: bool,
    segment_size: Option<u64>,
    container: String,
    abort: AbortFlag,
    seed: Connection,
}

fn object_name(path: &str) -> &str {
    path.strip_prefix("./")
        .or_else(|| path.strip_prefix(".\\"))
        .unwrap_or(path)
}

/// Whole seconds of the local file's mtime, as stored in
/// `x-object-meta-mtime`.
fn mtime_of(meta: &std::fs::Metadata) -> Result<String> {
    let modified = meta.modified()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).map_err(|err| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("file mtime before epoch: {err}"),
        ))
    })?;
    Ok(since_epoch.as_secs().to_string())
}

impl UploadObjects {
    /// True when the remote side already holds this directory marker.
    async fn marker_unchanged(
        &self,
        object: &str,
        mtime: &str,
        conn: &mut Connection,
    ) -> Result<bool> {
        let headers = match conn.head_object(&self.container, object).await {
            Ok(headers) => headers,
            Err(err) if err.is_not_found() => return Ok(false),
            Err(err) => return Err(err),
        };
        let is_dir = headers
            .get("content-type")
            .map(|ct| ct.split(';').next() == Some("text/directory"))
            .unwrap_or(false);
        Ok(is_dir
            && headers.get("content-length").map(String::as_str) == Some("0")
            && headers.get("etag").map(String::as_str) == Some(EMPTY_MD5)
            && headers.get("x-object-meta-mtime").map(String::as_str) == Some(mtime))
    }

    async fn upload_one(&self, job: &UploadJob, conn: &mut Connection) -> Result<()> {
        let object = object_name(&job.path);
        let meta = tokio::fs::metadata(&job.path).await?;
        let mtime = mtime_of(&meta)?;
        let mut put_headers = Headers::new();
        put_headers.insert("x-object-meta-mtime".to_string(), mtime.clone());

        if job.dir_marker {
            if self.changed && self.marker_unchanged(object, &mtime, conn).await? {
                return Ok(());
            }
            conn.put_object(
                &self.container,
                object,
                BodySource::empty(),
                Some("text/directory"),
                put_headers,
            )
            .await?;
        } else {
            let size = meta.len();
            // HEAD up front: --changed needs the remote state, and an
            // overwritten manifest object leaves segments we must
            // delete ourselves.
            let mut old_manifest = None;
            if self.changed || !self.leave_segments {
                match conn.head_object(&self.container, object).await {
                    Ok(headers) => {
                        let remote_len = headers
                            .get("content-length")
                            .and_then(|value| value.parse::<u64>().ok());
                        let remote_mtime = headers.get("x-object-meta-mtime").map(String::as_str);
                        if self.changed
                            && remote_len == Some(size)
                            && remote_mtime == Some(&mtime)
                        {
                            return Ok(());
                        }
                        if !self.leave_segments {
                            old_manifest = segment::manifest_of(&headers).map(str::to_owned);
                        }
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
            }

            match self.segment_size {
                Some(segment_size) if size > segment_size => {
                    segment::upload_segments(
                        &self.seed,
                        &self.abort,
                        &self.sink,
                        self.verbose,
                        &self.container,
                        object,
                        Path::new(&job.path),
                        &mtime,
                        size,
                        segment_size,
                    )
                    .await?;
                    let manifest =
                        segment::manifest_value(&self.container, object, &mtime, size);
                    // Re-uploading the same content keeps the same
                    // prefix; deleting it would hollow out the object.
                    if old_manifest.as_deref() == Some(manifest.as_str()) {
                        old_manifest = None;
                    }
                    put_headers.insert("x-object-manifest".to_string(), manifest);
                    conn.put_object(
                        &self.container,
                        object,
                        BodySource::empty(),
                        None,
                        put_headers,
                    )
                    .await?;
                }
                _ => {
                    conn.put_object(
                        &self.container,
                        object,
                        BodySource::File {
                            path: PathBuf::from(&job.path),
                            offset: 0,
                            len: size,
                        },
                        None,
                        put_headers,
                    )
                    .await?;
                }
            }

            if let Some(manifest) = old_manifest {
                segment::delete_manifest_segments(
                    conn,
                    &self.seed,
                    &self.abort,
                    &self.sink,
                    &manifest,
                    false,
                )
                .await?;
            }
        }

        if self.verbose {
            self.sink.progress(object.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for UploadObjects {
    type Item = UploadJob;
    type Session = Connection;

    async fn run(&self, job: UploadJob, conn: &mut Connection) -> Result<()> {
        match self.upload_one(&job, conn).await {
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                self.sink
                    .error(format!("Local file '{}' not found", job.path));
                Ok(())
            }
            other => other,
        }
    }
}

/// Walks a directory depth-first; empty directories become marker jobs.
fn walk(path: &str, jobs: &mut Vec<UploadJob>) -> std::io::Result<()> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        names.push((entry.file_name(), entry.file_type()?.is_dir()));
    }
    if names.is_empty() {
        jobs.push(UploadJob {
            path: path.to_string(),
            dir_marker: true,
        });
        return Ok(());
    }
    names.sort();
    for (name, is_dir) in names {
        let subpath = format!("{path}/{}", name.to_string_lossy());
        if is_dir {
            walk(&subpath, jobs)?;
        } else {
            jobs.push(UploadJob {
                path: subpath,
                dir_marker: false,
            });
        }
    }
    Ok(())
}

/// Execute the upload command
pub async fn execute(args: UploadArgs, ctx: &Ctx) -> ExitCode {
    warn_container_slash(&args.container);

    let seed = match ctx.authenticate().await {
        Ok(conn) => conn,
        Err(err) => return fail(&ctx.sink, &err),
    };
    let abort = AbortFlag::new();
    let pool = WorkerPool::spawn(
        Arc::new(UploadObjects {
            sink: ctx.sink.clone(),
            verbose: ctx.verbose >= 1,
            changed: args.changed,
            leave_segments: args.leave_segments,
            segment_size: args.segment_size,
            container: args.container.clone(),
            abort: abort.clone(),
            seed: seed.clone(),
        }),
        sessions(&seed),
        abort.clone(),
    );

    // Create the containers up front in case they don't exist. Failures
    // are ignored; the user may simply lack container PUT permission,
    // and a real problem will surface on the first object PUT.
    let mut conn = seed.clone();
    let _ = conn.put_container(&args.container, Headers::new()).await;
    if args.segment_size.is_some() {
        let _ = conn
            .put_container(&segment::segment_container(&args.container), Headers::new())
            .await;
    }

    let result = drive(&args, &pool).await;
    if result.is_err() {
        abort.raise();
    }
    let joined = pool.join().await;

    match result.and(joined) {
        Ok(()) => ExitCode::Success,
        Err(err) => fail(&ctx.sink, &err),
    }
}

async fn drive(args: &UploadArgs, pool: &WorkerPool<UploadObjects>) -> Result<()> {
    for arg in &args.paths {
        if Path::new(arg).is_dir() {
            let mut jobs = Vec::new();
            walk(arg.trim_end_matches('/'), &mut jobs)?;
            for job in jobs {
                pool.submit(job).await;
            }
        } else {
            pool.submit(UploadJob {
                path: arg.clone(),
                dir_marker: false,
            })
            .await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, Canned, auth_ok, serve_with};
    use std::fs;
    use std::io::Write as _;

    #[test]
    fn object_names_drop_the_current_dir_prefix() {
        assert_eq!(object_name("./photos/cat.jpg"), "photos/cat.jpg");
        assert_eq!(object_name("photos/cat.jpg"), "photos/cat.jpg");
    }

    #[test]
    fn walk_yields_files_and_marks_empty_dirs() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("tree");
        fs::create_dir_all(base.join("full")).unwrap();
        fs::create_dir_all(base.join("empty")).unwrap();
        fs::write(base.join("full/a.txt"), b"a").unwrap();
        fs::write(base.join("top.txt"), b"t").unwrap();

        let mut jobs = Vec::new();
        walk(&base.to_string_lossy(), &mut jobs).unwrap();

        let rel: Vec<(String, bool)> = jobs
            .iter()
            .map(|job| {
                let tail = job
                    .path
                    .strip_prefix(&*base.to_string_lossy())
                    .unwrap()
                    .trim_start_matches('/')
                    .to_string();
                (tail, job.dir_marker)
            })
            .collect();
        assert!(rel.contains(&("full/a.txt".to_string(), false)));
        assert!(rel.contains(&("top.txt".to_string(), false)));
        assert!(rel.contains(&("empty".to_string(), true)));
        assert_eq!(rel.len(), 3);
    }

    #[test]
    fn mtime_is_whole_seconds() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let meta = fs::metadata(tmp.path()).unwrap();
        let mtime = mtime_of(&meta).unwrap();
        assert!(mtime.chars().all(|c| c.is_ascii_digit()));
        assert!(mtime.parse::<u64>().unwrap() > 1_500_000_000);
    }

    #[tokio::test]
    async fn changed_upload_skips_an_unchanged_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();
        let mtime = mtime_of(&fs::metadata(tmp.path()).unwrap()).unwrap();

        let server = serve_with(|base| {
            vec![
                auth_ok(base),
                Canned::new(201, "Created"),
                Canned::new(200, "OK")
                    .header("content-length", "10")
                    .header("x-object-meta-mtime", &mtime),
            ]
        })
        .await;
        let (ctx, _print_rx, mut error_rx) = testutil::ctx(&server, 0);

        let args = UploadArgs {
            changed: true,
            segment_size: None,
            leave_segments: false,
            container: "photos".to_string(),
            paths: vec![tmp.path().to_string_lossy().into_owned()],
        };
        assert_eq!(execute(args, &ctx).await, ExitCode::Success);
        assert!(testutil::drain(&mut error_rx).is_empty());

        let requests = server.requests().await;
        let methods: Vec<&str> = requests.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(methods, ["GET", "PUT", "HEAD"]);
        // The only PUT is the container pre-create; the object itself
        // was never re-sent.
        assert_eq!(requests[1].target, "/v1/AUTH_test/photos");
    }

    #[tokio::test]
    async fn changed_upload_skips_an_unchanged_dir_marker() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("attic");
        fs::create_dir(&dir).unwrap();
        let mtime = mtime_of(&fs::metadata(&dir).unwrap()).unwrap();

        let server = serve_with(|base| {
            vec![
                auth_ok(base),
                Canned::new(201, "Created"),
                Canned::new(200, "OK")
                    .header("content-type", "text/directory")
                    .header("x-object-meta-mtime", &mtime)
                    .header("etag", EMPTY_MD5),
            ]
        })
        .await;
        let (ctx, _print_rx, mut error_rx) = testutil::ctx(&server, 0);

        let args = UploadArgs {
            changed: true,
            segment_size: None,
            leave_segments: false,
            container: "photos".to_string(),
            paths: vec![dir.to_string_lossy().into_owned()],
        };
        assert_eq!(execute(args, &ctx).await, ExitCode::Success);
        assert!(testutil::drain(&mut error_rx).is_empty());

        let methods: Vec<String> = server
            .requests()
            .await
            .into_iter()
            .map(|r| r.method)
            .collect();
        assert_eq!(methods, ["GET", "PUT", "HEAD"]);
    }

    #[tokio::test]
    async fn overwriting_a_manifest_deletes_the_old_segments() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"fresh contents").unwrap();
        tmp.flush().unwrap();

        let server = serve_with(|base| {
            vec![
                auth_ok(base),
                Canned::new(201, "Created"),
                Canned::new(200, "OK")
                    .header("content-length", "999")
                    .header("x-object-manifest", "photos_segments/movie/1/1000/"),
                Canned::new(201, "Created").header("etag", "abcd"),
                Canned::new(200, "OK").json(
                    r#"[{"name": "movie/1/1000/00000000", "bytes": 500, "hash": "h0",
                         "last_modified": "2011-03-04T12:00:00.000000",
                         "content_type": "application/octet-stream"},
                        {"name": "movie/1/1000/00000001", "bytes": 500, "hash": "h1",
                         "last_modified": "2011-03-04T12:00:01.000000",
                         "content_type": "application/octet-stream"}]"#,
                ),
                Canned::new(200, "OK").json("[]"),
                Canned::new(204, "No Content"),
                Canned::new(204, "No Content"),
            ]
        })
        .await;
        let (ctx, _print_rx, mut error_rx) = testutil::ctx(&server, 0);

        let args = UploadArgs {
            changed: false,
            segment_size: None,
            leave_segments: false,
            container: "photos".to_string(),
            paths: vec![tmp.path().to_string_lossy().into_owned()],
        };
        assert_eq!(execute(args, &ctx).await, ExitCode::Success);
        assert!(testutil::drain(&mut error_rx).is_empty());

        let requests = server.requests().await;
        let listing = requests
            .iter()
            .find(|r| r.method == "GET" && r.target.contains("prefix="))
            .unwrap();
        assert!(listing.target.starts_with("/v1/AUTH_test/photos_segments?"));
        assert!(listing.target.contains("prefix=movie%2F1%2F1000%2F"));

        let mut deleted: Vec<&str> = requests
            .iter()
            .filter(|r| r.method == "DELETE")
            .map(|r| r.target.as_str())
            .collect();
        deleted.sort();
        assert_eq!(
            deleted,
            [
                "/v1/AUTH_test/photos_segments/movie/1/1000/00000000",
                "/v1/AUTH_test/photos_segments/movie/1/1000/00000001",
            ]
        );
    }

    #[tokio::test]
    async fn leave_segments_skips_manifest_cleanup() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"fresh contents").unwrap();
        tmp.flush().unwrap();

        let server = serve_with(|base| {
            vec![
                auth_ok(base),
                Canned::new(201, "Created"),
                Canned::new(201, "Created").header("etag", "abcd"),
            ]
        })
        .await;
        let (ctx, _print_rx, mut error_rx) = testutil::ctx(&server, 0);

        let args = UploadArgs {
            changed: false,
            segment_size: None,
            leave_segments: true,
            container: "photos".to_string(),
            paths: vec![tmp.path().to_string_lossy().into_owned()],
        };
        assert_eq!(execute(args, &ctx).await, ExitCode::Success);
        assert!(testutil::drain(&mut error_rx).is_empty());

        // No HEAD, no old-prefix enumeration, no segment deletes.
        let methods: Vec<String> = server
            .requests()
            .await
            .into_iter()
            .map(|r| r.method)
            .collect();
        assert_eq!(methods, ["GET", "PUT", "PUT"]);
    }
}
