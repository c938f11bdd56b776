//! stat command - Show account, container, or object info
//!
//! HEADs the target and renders its headers as aligned label/value
//! rows: the well-known fields first, then `X-*-Meta-*` items, then
//! whatever else the server sent.

use clap::Args;

use st_swift::Session;
use st_swift::protocol::Headers;

use crate::commands::{Ctx, fail, warn_container_slash};
use crate::exit_code::ExitCode;

/// Display information for the account, a container, or an object
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Container to stat
    pub container: Option<String>,

    /// Object to stat
    pub object: Option<String>,
}

/// The account id is the last path segment of the storage endpoint.
fn account_of(session: &Session) -> String {
    session
        .storage_url
        .as_str()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Python's `str.title()`: uppercase the first letter of every
/// alphabetic run, lowercase the rest.
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_alpha = false;
    for ch in value.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

fn count_of(headers: &Headers, name: &str) -> u64 {
    headers
        .get(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Emits `Meta <Name>` rows for one metadata prefix, then the
/// remaining headers, skipping the well-known ones already rendered.
fn trailer_rows(ctx: &Ctx, headers: &Headers, width: usize, meta_prefix: &str, skip: &[&str]) {
    for (key, value) in headers {
        if let Some(name) = key.strip_prefix(meta_prefix) {
            let label = format!("Meta {}", title_case(name));
            ctx.sink.progress(format!("{label:>width$}: {value}"));
        }
    }
    for (key, value) in headers {
        if !key.starts_with(meta_prefix) && !skip.contains(&key.as_str()) {
            let label = title_case(key);
            ctx.sink.progress(format!("{label:>width$}: {value}"));
        }
    }
}

/// Execute the stat command
pub async fn execute(args: StatArgs, ctx: &Ctx) -> ExitCode {
    let mut conn = ctx.connection();
    match (&args.container, &args.object) {
        (None, _) => match conn.head_account().await {
            Ok(headers) => {
                let Some(session) = conn.session().cloned() else {
                    return ExitCode::GeneralError;
                };
                if ctx.verbose > 1 {
                    ctx.sink
                        .progress(format!("StorageURL: {}", session.storage_url));
                    ctx.sink.progress(format!("Auth Token: {}", session.token));
                }
                ctx.sink
                    .progress(format!("{:>10}: {}", "Account", account_of(&session)));
                ctx.sink.progress(format!(
                    "{:>10}: {}",
                    "Containers",
                    count_of(&headers, "x-account-container-count")
                ));
                ctx.sink.progress(format!(
                    "{:>10}: {}",
                    "Objects",
                    count_of(&headers, "x-account-object-count")
                ));
                ctx.sink.progress(format!(
                    "{:>10}: {}",
                    "Bytes",
                    count_of(&headers, "x-account-bytes-used")
                ));
                trailer_rows(
                    ctx,
                    &headers,
                    10,
                    "x-account-meta-",
                    &[
                        "content-length",
                        "date",
                        "x-account-container-count",
                        "x-account-object-count",
                        "x-account-bytes-used",
                    ],
                );
                ExitCode::Success
            }
            Err(err) if err.is_not_found() => {
                ctx.sink.error("Account not found");
                ExitCode::NotFound
            }
            Err(err) => fail(&ctx.sink, &err),
        },
        (Some(container), None) => {
            warn_container_slash(container);
            match conn.head_container(container).await {
                Ok(headers) => {
                    let Some(session) = conn.session().cloned() else {
                        return ExitCode::GeneralError;
                    };
                    let empty = String::new();
                    ctx.sink
                        .progress(format!("{:>9}: {}", "Account", account_of(&session)));
                    ctx.sink
                        .progress(format!("{:>9}: {}", "Container", container));
                    ctx.sink.progress(format!(
                        "{:>9}: {}",
                        "Objects",
                        count_of(&headers, "x-container-object-count")
                    ));
                    ctx.sink.progress(format!(
                        "{:>9}: {}",
                        "Bytes",
                        count_of(&headers, "x-container-bytes-used")
                    ));
                    ctx.sink.progress(format!(
                        "{:>9}: {}",
                        "Read ACL",
                        headers.get("x-container-read").unwrap_or(&empty)
                    ));
                    ctx.sink.progress(format!(
                        "{:>9}: {}",
                        "Write ACL",
                        headers.get("x-container-write").unwrap_or(&empty)
                    ));
                    trailer_rows(
                        ctx,
                        &headers,
                        9,
                        "x-container-meta-",
                        &[
                            "content-length",
                            "date",
                            "x-container-object-count",
                            "x-container-bytes-used",
                            "x-container-read",
                            "x-container-write",
                        ],
                    );
                    ExitCode::Success
                }
                Err(err) if err.is_not_found() => {
                    ctx.sink.error(format!("Container '{container}' not found"));
                    ExitCode::NotFound
                }
                Err(err) => fail(&ctx.sink, &err),
            }
        }
        (Some(container), Some(object)) => match conn.head_object(container, object).await {
            Ok(headers) => {
                let Some(session) = conn.session().cloned() else {
                    return ExitCode::GeneralError;
                };
                let empty = String::new();
                ctx.sink
                    .progress(format!("{:>14}: {}", "Account", account_of(&session)));
                ctx.sink
                    .progress(format!("{:>14}: {}", "Container", container));
                ctx.sink.progress(format!("{:>14}: {}", "Object", object));
                ctx.sink.progress(format!(
                    "{:>14}: {}",
                    "Content Type",
                    headers.get("content-type").unwrap_or(&empty)
                ));
                for (label, name) in [
                    ("Content Length", "content-length"),
                    ("Last Modified", "last-modified"),
                    ("ETag", "etag"),
                    ("Manifest", "x-object-manifest"),
                ] {
                    if let Some(value) = headers.get(name) {
                        ctx.sink.progress(format!("{label:>14}: {value}"));
                    }
                }
                trailer_rows(
                    ctx,
                    &headers,
                    14,
                    "x-object-meta-",
                    &[
                        "content-type",
                        "content-length",
                        "last-modified",
                        "etag",
                        "date",
                        "x-object-manifest",
                    ],
                );
                ExitCode::Success
            }
            Err(err) if err.is_not_found() => {
                ctx.sink
                    .error(format!("Object '{container}/{object}' not found"));
                ExitCode::NotFound
            }
            Err(err) => fail(&ctx.sink, &err),
        },
    }
}
