//! post command - Update metadata
//!
//! Updates metadata for the account, a container, or an object. A
//! missing container is created instead; missing accounts and objects
//! are reported.

use clap::Args;

use st_swift::protocol::Headers;

use crate::commands::{Ctx, fail, warn_container_slash};
use crate::exit_code::ExitCode;

/// Update metadata for the account, a container, or an object
#[derive(Args, Debug)]
pub struct PostArgs {
    /// Read ACL for containers (.r:*, .r:-.example.com, account1, ...)
    #[arg(short = 'r', long = "read-acl", requires = "container")]
    pub read_acl: Option<String>,

    /// Write ACL for containers (account1, account2:user2, ...)
    #[arg(short = 'w', long = "write-acl", requires = "container")]
    pub write_acl: Option<String>,

    /// Metadata item in Name:Value form; may be repeated
    #[arg(short = 'm', long = "meta")]
    pub meta: Vec<String>,

    /// Container to update
    pub container: Option<String>,

    /// Object to update
    pub object: Option<String>,
}

/// Builds `X-<scope>-Meta-<Name>` headers from repeated `Name:Value`
/// flags. A flag without a value clears the item.
fn meta_headers(scope: &str, meta: &[String]) -> Headers {
    let mut headers = Headers::new();
    for item in meta {
        let (name, value) = item.split_once(':').unwrap_or((item.as_str(), ""));
        headers.insert(format!("x-{scope}-meta-{name}"), value.to_string());
    }
    headers
}

/// Execute the post command
pub async fn execute(args: PostArgs, ctx: &Ctx) -> ExitCode {
    let mut conn = ctx.connection();
    match (&args.container, &args.object) {
        (None, _) => {
            let headers = meta_headers("account", &args.meta);
            match conn.post_account(headers).await {
                Ok(()) => ExitCode::Success,
                Err(err) if err.is_not_found() => {
                    ctx.sink.error("Account not found");
                    ExitCode::NotFound
                }
                Err(err) => fail(&ctx.sink, &err),
            }
        }
        (Some(container), None) => {
            warn_container_slash(container);
            let mut headers = meta_headers("container", &args.meta);
            if let Some(read_acl) = &args.read_acl {
                headers.insert("x-container-read".to_string(), read_acl.clone());
            }
            if let Some(write_acl) = &args.write_acl {
                headers.insert("x-container-write".to_string(), write_acl.clone());
            }
            match conn.post_container(container, headers.clone()).await {
                Ok(()) => ExitCode::Success,
                // A missing container is created with the same headers.
                Err(err) if err.is_not_found() => {
                    match conn.put_container(container, headers).await {
                        Ok(()) => ExitCode::Success,
                        Err(err) => fail(&ctx.sink, &err),
                    }
                }
                Err(err) => fail(&ctx.sink, &err),
            }
        }
        (Some(container), Some(object)) => {
            let headers = meta_headers("object", &args.meta);
            match conn.post_object(container, object, headers).await {
                Ok(()) => ExitCode::Success,
                Err(err) if err.is_not_found() => {
                    ctx.sink
                        .error(format!("Object '{container}/{object}' not found"));
                    ExitCode::NotFound
                }
                Err(err) => fail(&ctx.sink, &err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_flags_become_scoped_headers() {
        let headers = meta_headers(
            "container",
            &["Color:Blue".to_string(), "Size:Large".to_string()],
        );
        assert_eq!(
            headers.get("x-container-meta-Color").map(String::as_str),
            Some("Blue")
        );
        assert_eq!(
            headers.get("x-container-meta-Size").map(String::as_str),
            Some("Large")
        );
    }

    #[test]
    fn meta_without_a_value_clears_the_item() {
        let headers = meta_headers("account", &["Subject".to_string()]);
        assert_eq!(
            headers.get("x-account-meta-Subject").map(String::as_str),
            Some("")
        );
    }

    #[test]
    fn meta_value_may_contain_colons() {
        let headers = meta_headers("object", &["Url:http://a/b".to_string()]);
        assert_eq!(
            headers.get("x-object-meta-Url").map(String::as_str),
            Some("http://a/b")
        );
    }
}
