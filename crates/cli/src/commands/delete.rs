//! delete command - Remove containers and objects
//!
//! Deletes everything in the account (with --all), everything in one
//! container, or an explicit list of objects. Manifest objects take
//! their segments with them unless --leave-segments is given.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Args;

use st_core::{AbortFlag, JobHandler, PoolHandle, ReportSink, Result, WorkerPool};
use st_swift::Connection;
use st_swift::segment;

use crate::commands::{Ctx, display_path, fail, sessions, warn_container_slash};
use crate::exit_code::ExitCode;

/// Delete containers and objects
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Delete everything in the account
    #[arg(short = 'a', long = "all", conflicts_with = "container")]
    pub all: bool,

    /// Leave the segments of manifest objects alone
    #[arg(long)]
    pub leave_segments: bool,

    /// Container to delete from
    pub container: Option<String>,

    /// Objects to delete; with none given, the whole container goes
    pub objects: Vec<String>,
}

struct ObjectJob {
    container: String,
    object: String,
}

struct DeleteObjects {
    sink: ReportSink,
    verbose: bool,
    all: bool,
    leave_segments: bool,
    abort: AbortFlag,
    seed: Connection,
}

impl DeleteObjects {
    async fn delete_one(&self, job: &ObjectJob, conn: &mut Connection) -> Result<()> {
        let mut old_manifest = None;
        if !self.leave_segments {
            match conn.head_object(&job.container, &job.object).await {
                Ok(headers) => {
                    old_manifest = segment::manifest_of(&headers).map(str::to_owned);
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        conn.delete_object(&job.container, &job.object).await?;
        if let Some(manifest) = old_manifest {
            segment::delete_manifest_segments(
                conn,
                &self.seed,
                &self.abort,
                &self.sink,
                &manifest,
                self.verbose,
            )
            .await?;
        }
        if self.verbose {
            let path = if self.all {
                format!("{}/{}", job.container, job.object)
            } else {
                job.object.clone()
            };
            self.sink.progress(display_path(&path).to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for DeleteObjects {
    type Item = ObjectJob;
    type Session = Connection;

    async fn run(&self, job: ObjectJob, conn: &mut Connection) -> Result<()> {
        match self.delete_one(&job, conn).await {
            Err(err) if err.is_not_found() => {
                self.sink
                    .error(format!("Object '{}/{}' not found", job.container, job.object));
                Ok(())
            }
            other => other,
        }
    }
}

struct DeleteContainers {
    sink: ReportSink,
    objects: PoolHandle<ObjectJob>,
}

impl DeleteContainers {
    /// Enumerates the container into the object pool, waits for those
    /// deletes to finish, then removes the container itself, tolerating
    /// 409s while stragglers land.
    async fn delete_container(&self, container: &str, conn: &mut Connection) -> Result<()> {
        let mut marker: Option<String> = None;
        loop {
            let (_, page) = conn
                .get_container(container, marker.as_deref(), None, None, None, false)
                .await?;
            let Some(last) = page.last().map(|entry| entry.marker().to_owned()) else {
                break;
            };
            for entry in &page {
                if let Some(record) = entry.as_object() {
                    self.objects
                        .submit(ObjectJob {
                            container: container.to_owned(),
                            object: record.name.clone(),
                        })
                        .await;
                }
            }
            marker = Some(last);
        }
        self.objects.wait_idle().await;

        let mut attempts = 1;
        loop {
            match conn.delete_container(container).await {
                Ok(()) => return Ok(()),
                Err(err) if err.status() == Some(409) && attempts <= 10 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl JobHandler for DeleteContainers {
    type Item = String;
    type Session = Connection;

    async fn run(&self, container: String, conn: &mut Connection) -> Result<()> {
        match self.delete_container(&container, conn).await {
            Err(err) if err.is_not_found() => {
                self.sink.error(format!("Container '{container}' not found"));
                Ok(())
            }
            other => other,
        }
    }
}

/// Execute the delete command
pub async fn execute(args: DeleteArgs, ctx: &Ctx) -> ExitCode {
    if args.container.is_none() && !args.all {
        ctx.sink
            .error("delete: either --all or a container is required");
        return ExitCode::UsageError;
    }
    if let Some(container) = &args.container {
        warn_container_slash(container);
    }

    let seed = match ctx.authenticate().await {
        Ok(conn) => conn,
        Err(err) => return fail(&ctx.sink, &err),
    };
    let abort = AbortFlag::new();
    let objects = WorkerPool::spawn(
        Arc::new(DeleteObjects {
            sink: ctx.sink.clone(),
            verbose: ctx.verbose >= 1,
            all: args.all,
            leave_segments: args.leave_segments,
            abort: abort.clone(),
            seed: seed.clone(),
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
    args: &DeleteArgs,
    ctx: &Ctx,
    seed: &Connection,
    abort: &AbortFlag,
    objects: &WorkerPool<DeleteObjects>,
) -> Result<()> {
    let handler = DeleteContainers {
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
            match handler.delete_container(container, &mut conn).await {
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
                    .submit(ObjectJob {
                        container: container.clone(),
                        object: object.clone(),
                    })
                    .await;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, Canned, auth_ok, serve_with};

    #[tokio::test]
    async fn verbose_delete_announces_each_removed_segment() {
        let server = serve_with(|base| {
            vec![
                auth_ok(base),
                Canned::new(200, "OK").header("x-object-manifest", "photos_segments/big/1/5/"),
                Canned::new(204, "No Content"),
                Canned::new(200, "OK").json(
                    r#"[{"name": "big/1/5/00000000", "bytes": 5, "hash": "h",
                         "last_modified": "2011-03-04T12:00:00.000000",
                         "content_type": "application/octet-stream"}]"#,
                ),
                Canned::new(200, "OK").json("[]"),
                Canned::new(204, "No Content"),
            ]
        })
        .await;
        let (ctx, mut print_rx, mut error_rx) = testutil::ctx(&server, 1);

        let args = DeleteArgs {
            all: false,
            leave_segments: false,
            container: Some("photos".to_string()),
            objects: vec!["big".to_string()],
        };
        assert_eq!(execute(args, &ctx).await, ExitCode::Success);
        assert!(testutil::drain(&mut error_rx).is_empty());

        let lines = testutil::drain(&mut print_rx);
        assert!(lines.contains(&"photos_segments/big/1/5/00000000".to_string()));
        assert!(lines.contains(&"big".to_string()));

        let deletes = server
            .requests()
            .await
            .into_iter()
            .filter(|r| r.method == "DELETE")
            .count();
        assert_eq!(deletes, 2);
    }
}
