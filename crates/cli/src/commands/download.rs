//! download command - Fetch objects to the local filesystem
//!
//! Downloads everything in the account (with --all), everything in a
//! container, or a list of objects. Bodies are streamed to disk and
//! verified against the ETag and Content-Length; `text/directory`
//! objects materialize as directories.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use clap::Args;

use st_core::{AbortFlag, JobHandler, PoolHandle, ReportSink, Result, WorkerPool};
use st_swift::Connection;
use st_swift::protocol::Headers;
use st_swift::segment::{self, Destination};

use crate::commands::{Ctx, display_path, fail, sessions, warn_container_slash};
use crate::exit_code::ExitCode;

/// Download containers and objects
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Download everything in the account
    #[arg(short = 'a', long = "all", conflicts_with = "container")]
    pub all: bool,

    /// For a single object download, write to this file ("-" for stdout)
    #[arg(short = 'o', long = "output")]
    pub out_file: Option<String>,

    /// Container to download from
    pub container: Option<String>,

    /// Objects to download; with none given, the whole container comes
    pub objects: Vec<String>,
}

struct DownloadJob {
    container: String,
    object: String,
    out_file: Option<String>,
}

struct DownloadObjects {
    sink: ReportSink,
    verbose: bool,
    all: bool,
}

impl DownloadObjects {
    async fn download_one(&self, job: &DownloadJob, conn: &mut Connection) -> Result<()> {
        let (headers, mut body) = conn.get_object(&job.container, &job.object).await?;
        let path = if self.all {
            format!("{}/{}", job.container, job.object)
        } else {
            job.object.clone()
        };
        let path = display_path(&path).to_string();
        let to_stdout = job.out_file.as_deref() == Some("-");

        let content_type = headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or_default();
        let summary = if content_type.split(';').next() == Some("text/directory") {
            if !to_stdout {
                tokio::fs::create_dir_all(&path).await?;
            }
            segment::read_object_body(&headers, &mut body, Destination::Discard).await?
        } else if to_stdout {
            let mut stdout = tokio::io::stdout();
            segment::read_object_body(&headers, &mut body, Destination::Writer(&mut stdout))
                .await?
        } else {
            let target = job.out_file.as_deref().unwrap_or(&path);
            if let Some(parent) = Path::new(target).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::File::create(target).await?;
            segment::read_object_body(&headers, &mut body, Destination::Writer(&mut file)).await?
        };

        for line in segment::integrity_errors(&path, &headers, &summary) {
            self.sink.error(line);
        }
        if job.out_file.is_none() {
            apply_remote_mtime(&path, &headers);
        }
        if self.verbose {
            self.sink.progress(path);
        }
        Ok(())
    }
}

/// Sets the local mtime from `x-object-meta-mtime`, when present. Not
/// being able to is logged, never fatal.
fn apply_remote_mtime(path: &str, headers: &Headers) {
    let Some(mtime) = headers.get("x-object-meta-mtime") else {
        return;
    };
    let Ok(seconds) = mtime.parse::<f64>() else {
        tracing::debug!(path, mtime, "unparseable x-object-meta-mtime");
        return;
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return;
    }
    let modified = SystemTime::UNIX_EPOCH + Duration::from_secs_f64(seconds);
    let applied = std::fs::File::open(path).and_then(|file| file.set_modified(modified));
    if let Err(err) = applied {
        tracing::debug!(path, %err, "could not apply remote mtime");
    }
}

#[async_trait]
impl JobHandler for DownloadObjects {
    type Item = DownloadJob;
    type Session = Connection;

    async fn run(&self, job: DownloadJob, conn: &mut Connection) -> Result<()> {
        match self.download_one(&job, conn).await {
            Err(err) if err.is_not_found() => {
                self.sink
                    .error(format!("Object '{}/{}' not found", job.container, job.object));
                Ok(())
            }
            other => other,
        }
    }
}

struct DownloadContainers {
    sink: ReportSink,
    objects: PoolHandle<DownloadJob>,
}

impl DownloadContainers {
    async fn enumerate(&self, container: &str, conn: &mut Connection) -> Result<()> {
        let mut marker: Option<String> = None;
        loop {
            let (_, page) = conn
                .get_container(container, marker.as_deref(), None, None, None, false)
                .await?;
            let Some(last) = page.last().map(|entry| entry.marker().to_owned()) else {
                return Ok(());
            };
            for entry in &page {
                if let Some(record) = entry.as_object() {
                    self.objects
                        .submit(DownloadJob {
                            container: container.to_owned(),
                            object: record.name.clone(),
                            out_file: None,
                        })
                        .await;
                }
            }
            marker = Some(last);
        }
    }
}

#[async_trait]
impl JobHandler for DownloadContainers {
    type Item = String;
    type Session = Connection;

    async fn run(&self, container: String, conn: &mut Connection) -> Result<()> {
        match self.enumerate(&container, conn).await {
            Err(err) if err.is_not_found() => {
                self.sink.error(format!("Container '{container}' not found"));
                Ok(())
            }
            other => other,
        }
    }
}

/// Execute the download command
pub async fn execute(args: DownloadArgs, ctx: &Ctx) -> ExitCode {
    if args.container.is_none() && !args.all {
        ctx.sink
            .error("download: either --all or a container is required");
        return ExitCode::UsageError;
    }
    if args.out_file.is_some() && args.objects.len() != 1 {
        ctx.sink
            .error("-o option only allowed for single object downloads");
        return ExitCode::UsageError;
    }
    if let Some(container) = &args.container {
        warn_container_slash(container);
    }
    // Streaming to stdout leaves no room for status lines.
    let verbose = ctx.verbose >= 1 && args.out_file.as_deref() != Some("-");

    let seed = match ctx.authenticate().await {
        Ok(conn) => conn,
        Err(err) => return fail(&ctx.sink, &err),
    };
    let abort = AbortFlag::new();
    let objects = WorkerPool::spawn(
        Arc::new(DownloadObjects {
            sink: ctx.sink.clone(),
            verbose,
            all: args.all,
        }),
        sessions(&seed),
        abort.clone(),
    );

    let result = drive(&args, ctx, &seed, &abort, &objects).await;
    if result.is_err() {
        abort.raise();
    }
    let joined = objects.join().await;

    match result.and(joined) {
        Ok(()) => ExitCode::Success,
        Err(err) => fail(&ctx.sink, &err),
    }
}

async fn drive(
    args: &DownloadArgs,
    ctx: &Ctx,
    seed: &Connection,
    abort: &AbortFlag,
    objects: &WorkerPool<DownloadObjects>,
) -> Result<()> {
    let handler = DownloadContainers {
        sink: ctx.sink.clone(),
        objects: objects.handle(),
    };

    match &args.container {
        None => {
            let containers = WorkerPool::spawn(Arc::new(handler), sessions(seed), abort.clone());
            let mut conn = seed.clone();
            let mut marker: Option<String> = None;
            let enumerated: Result<()> = async {
                loop {
                    let (_, page) = conn
                        .get_account(marker.as_deref(), None, None, false)
                        .await?;
                    let Some(last) = page.last().map(|record| record.name.clone()) else {
                        break;
                    };
                    for record in &page {
                        containers.submit(record.name.clone()).await;
                    }
                    marker = Some(last);
                }
                Ok(())
            }
            .await;
            match enumerated {
                Err(err) if err.is_not_found() => ctx.sink.error("Account not found"),
                Err(err) => {
                    abort.raise();
                    let _ = containers.join().await;
                    return Err(err);
                }
                Ok(()) => {}
            }
            containers.join().await
        }
        Some(container) if args.objects.is_empty() => {
            let mut conn = seed.clone();
            match handler.enumerate(container, &mut conn).await {
                Err(err) if err.is_not_found() => {
                    ctx.sink.error(format!("Container '{container}' not found"));
                    Ok(())
                }
                other => other,
            }
        }
        Some(container) => {
            for object in &args.objects {
                objects
                    .submit(DownloadJob {
                        container: container.clone(),
                        object: object.clone(),
                        out_file: args.out_file.clone(),
                    })
                    .await;
            }
            Ok(())
        }
    }
}
