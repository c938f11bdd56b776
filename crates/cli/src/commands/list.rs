//! list command - Enumerate containers or objects
//!
//! Lists the account's containers, or a container's objects, printing
//! one name per line as each page arrives.

use clap::Args;

use st_core::Result;
use st_swift::Connection;

use crate::commands::{Ctx, fail, warn_container_slash};
use crate::exit_code::ExitCode;

/// List containers for the account or objects for a container
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only list items beginning with the prefix
    #[arg(short = 'p', long = "prefix")]
    pub prefix: Option<String>,

    /// Roll up items with the given delimiter (container listings only)
    #[arg(short = 'd', long = "delimiter", requires = "container")]
    pub delimiter: Option<String>,

    /// Container to list; omit to list the account
    pub container: Option<String>,
}

/// Execute the list command
pub async fn execute(args: ListArgs, ctx: &Ctx) -> ExitCode {
    if let Some(container) = &args.container {
        warn_container_slash(container);
    }
    let mut conn = ctx.connection();
    match list_pages(&args, ctx, &mut conn).await {
        Ok(()) => ExitCode::Success,
        Err(err) if err.is_not_found() => {
            match &args.container {
                None => ctx.sink.error("Account not found"),
                Some(container) => ctx
                    .sink
                    .error(format!("Container '{container}' not found")),
            }
            ExitCode::NotFound
        }
        Err(err) => fail(&ctx.sink, &err),
    }
}

async fn list_pages(args: &ListArgs, ctx: &Ctx, conn: &mut Connection) -> Result<()> {
    let mut marker: Option<String> = None;
    loop {
        let last = match &args.container {
            None => {
                let (_, page) = conn
                    .get_account(marker.as_deref(), None, args.prefix.as_deref(), false)
                    .await?;
                for record in &page {
                    ctx.sink.progress(record.name.clone());
                }
                page.last().map(|record| record.name.clone())
            }
            Some(container) => {
                let (_, page) = conn
                    .get_container(
                        container,
                        marker.as_deref(),
                        None,
                        args.prefix.as_deref(),
                        args.delimiter.as_deref(),
                        false,
                    )
                    .await?;
                for entry in &page {
                    ctx.sink.progress(entry.marker().to_string());
                }
                page.last().map(|entry| entry.marker().to_owned())
            }
        };
        let Some(last) = last else {
            return Ok(());
        };
        marker = Some(last);
    }
}
