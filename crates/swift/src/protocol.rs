//! Stateless request builders for the Swift REST API.
//!
//! One async function per protocol operation, each taking the shared
//! HTTP client and an authenticated session. Response headers come back
//! as a lowercase-keyed map; any status outside [200, 300) becomes a
//! structured [`ProtocolError`] carrying the full request context.

use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::{Client, Method, Response, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use url::Url;

use st_core::{Credentials, Error, ProtocolError, Result};

use crate::listing::{ContainerRecord, ObjectEntry};

/// Response headers, case-normalized to lowercase names.
pub type Headers = BTreeMap<String, String>;

/// An authenticated session: the storage endpoint and its token.
#[derive(Debug, Clone)]
pub struct Session {
    pub storage_url: Url,
    pub token: String,
}

/// Body for an object PUT.
pub enum PutBody {
    /// Fully buffered body with a known length.
    Buffered(Bytes),
    /// Readable stream. With a length the body is framed as exactly
    /// that many bytes; without one it is sent with chunked transfer
    /// framing.
    Stream {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        length: Option<u64>,
    },
}

impl PutBody {
    pub fn empty() -> Self {
        PutBody::Buffered(Bytes::new())
    }
}

/// Lazy, finite, non-restartable sequence of body chunks from an
/// object GET. Must be fully drained before the same session issues
/// another call.
pub struct ObjectBody {
    resp: Response,
}

impl ObjectBody {
    /// Next chunk of the body, or `None` once exhausted.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.resp.chunk().await.map_err(transport)
    }

    /// Materializes the remaining body.
    pub async fn bytes(self) -> Result<Bytes> {
        self.resp.bytes().await.map_err(transport)
    }
}

/// Percent-encodes a name for use in a request path, leaving `/` as a
/// separator.
pub fn quote(value: &str) -> String {
    value
        .split('/')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn transport(err: reqwest::Error) -> Error {
    Error::Transport(err.to_string())
}

fn failed(action: &str, url: &Url, query: Option<&str>, status: StatusCode) -> Error {
    Error::Protocol(ProtocolError {
        action: action.to_string(),
        scheme: url.scheme().to_string(),
        host: url.host_str().unwrap_or_default().to_string(),
        port: url.port_or_known_default(),
        path: url.path().to_string(),
        query: query.map(str::to_string),
        status: status.as_u16(),
        reason: status
            .canonical_reason()
            .unwrap_or_default()
            .to_string(),
    })
}

fn lower_headers(resp: &Response) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in resp.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }
    headers
}

/// Builds the request URL for the account, a container, or an object.
fn resource(
    session: &Session,
    container: Option<&str>,
    object: Option<&str>,
    query: Option<&str>,
) -> Url {
    let mut path = session.storage_url.path().trim_end_matches('/').to_string();
    if let Some(container) = container {
        path.push('/');
        path.push_str(&quote(container));
        if let Some(object) = object {
            path.push('/');
            path.push_str(&quote(object));
        }
    }
    let mut url = session.storage_url.clone();
    url.set_path(&path);
    url.set_query(query);
    url
}

fn listing_query(
    marker: Option<&str>,
    limit: Option<u64>,
    prefix: Option<&str>,
    delimiter: Option<&str>,
) -> String {
    let mut qs = String::from("format=json");
    if let Some(marker) = marker {
        qs.push_str(&format!("&marker={}", urlencoding::encode(marker)));
    }
    if let Some(limit) = limit {
        qs.push_str(&format!("&limit={limit}"));
    }
    if let Some(prefix) = prefix {
        qs.push_str(&format!("&prefix={}", urlencoding::encode(prefix)));
    }
    if let Some(delimiter) = delimiter {
        qs.push_str(&format!("&delimiter={}", urlencoding::encode(delimiter)));
    }
    qs
}

/// Issues a request with no interesting body and returns the response
/// headers. Shared by the HEAD/POST/PUT/DELETE operations.
async fn simple(
    client: &Client,
    session: &Session,
    method: Method,
    action: &str,
    container: Option<&str>,
    object: Option<&str>,
    extra: Option<&Headers>,
) -> Result<Headers> {
    let url = resource(session, container, object, None);
    let mut req = client
        .request(method, url.clone())
        .header("x-auth-token", &session.token);
    if let Some(extra) = extra {
        for (name, value) in extra {
            req = req.header(name, value);
        }
    }
    let resp = req.send().await.map_err(transport)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(failed(action, &url, None, status));
    }
    Ok(lower_headers(&resp))
}

/// Acquires authentication credentials: a single GET against the auth
/// endpoint with user/key headers, returning the storage endpoint and
/// token extracted from the response headers.
pub async fn get_auth(client: &Client, credentials: &Credentials) -> Result<Session> {
    let auth_url = Url::parse(&credentials.auth_url).map_err(|err| {
        Error::Config(format!(
            "invalid auth URL {:?}: {err}",
            credentials.auth_url
        ))
    })?;
    let resp = client
        .get(auth_url.clone())
        .header("x-auth-user", &credentials.user)
        .header("x-auth-key", &credentials.key)
        .send()
        .await
        .map_err(transport)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(failed("Auth GET failed", &auth_url, None, status));
    }
    let headers = lower_headers(&resp);
    let missing = |name: &str| {
        Error::Protocol(ProtocolError {
            action: "Auth GET failed".to_string(),
            scheme: auth_url.scheme().to_string(),
            host: auth_url.host_str().unwrap_or_default().to_string(),
            port: auth_url.port_or_known_default(),
            path: auth_url.path().to_string(),
            query: None,
            status: status.as_u16(),
            reason: format!("response missing {name} header"),
        })
    };
    let storage = headers
        .get("x-storage-url")
        .ok_or_else(|| missing("x-storage-url"))?;
    let token = headers
        .get("x-storage-token")
        .or_else(|| headers.get("x-auth-token"))
        .ok_or_else(|| missing("x-storage-token"))?
        .clone();
    let mut storage_url = Url::parse(storage)
        .map_err(|err| Error::Config(format!("invalid storage URL {storage:?}: {err}")))?;
    if credentials.snet {
        let host = format!("snet-{}", storage_url.host_str().unwrap_or_default());
        storage_url
            .set_host(Some(&host))
            .map_err(|err| Error::Config(format!("invalid service-net host {host:?}: {err}")))?;
    }
    Ok(Session { storage_url, token })
}

/// One page of the account's container listing. Status 204 normalizes
/// to an empty listing.
pub async fn get_account(
    client: &Client,
    session: &Session,
    marker: Option<&str>,
    limit: Option<u64>,
    prefix: Option<&str>,
) -> Result<(Headers, Vec<ContainerRecord>)> {
    let query = listing_query(marker, limit, prefix, None);
    let url = resource(session, None, None, Some(&query));
    let resp = client
        .get(url.clone())
        .header("x-auth-token", &session.token)
        .send()
        .await
        .map_err(transport)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(failed("Account GET failed", &url, Some(&query), status));
    }
    let headers = lower_headers(&resp);
    if status == StatusCode::NO_CONTENT {
        return Ok((headers, Vec::new()));
    }
    let body = resp.bytes().await.map_err(transport)?;
    let listing =
        serde_json::from_slice(&body).map_err(|err| Error::Listing(err.to_string()))?;
    Ok((headers, listing))
}

/// Account stats.
pub async fn head_account(client: &Client, session: &Session) -> Result<Headers> {
    simple(
        client,
        session,
        Method::HEAD,
        "Account HEAD failed",
        None,
        None,
        None,
    )
    .await
}

/// Updates the account's metadata.
pub async fn post_account(client: &Client, session: &Session, headers: &Headers) -> Result<()> {
    simple(
        client,
        session,
        Method::POST,
        "Account POST failed",
        None,
        None,
        Some(headers),
    )
    .await
    .map(|_| ())
}

/// One page of a container's object listing. Status 204 normalizes to
/// an empty listing.
pub async fn get_container(
    client: &Client,
    session: &Session,
    container: &str,
    marker: Option<&str>,
    limit: Option<u64>,
    prefix: Option<&str>,
    delimiter: Option<&str>,
) -> Result<(Headers, Vec<ObjectEntry>)> {
    let query = listing_query(marker, limit, prefix, delimiter);
    let url = resource(session, Some(container), None, Some(&query));
    let resp = client
        .get(url.clone())
        .header("x-auth-token", &session.token)
        .send()
        .await
        .map_err(transport)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(failed("Container GET failed", &url, Some(&query), status));
    }
    let headers = lower_headers(&resp);
    if status == StatusCode::NO_CONTENT {
        return Ok((headers, Vec::new()));
    }
    let body = resp.bytes().await.map_err(transport)?;
    let listing =
        serde_json::from_slice(&body).map_err(|err| Error::Listing(err.to_string()))?;
    Ok((headers, listing))
}

/// Container stats.
pub async fn head_container(
    client: &Client,
    session: &Session,
    container: &str,
) -> Result<Headers> {
    simple(
        client,
        session,
        Method::HEAD,
        "Container HEAD failed",
        Some(container),
        None,
        None,
    )
    .await
}

/// Creates a container.
pub async fn put_container(
    client: &Client,
    session: &Session,
    container: &str,
    headers: &Headers,
) -> Result<()> {
    simple(
        client,
        session,
        Method::PUT,
        "Container PUT failed",
        Some(container),
        None,
        Some(headers),
    )
    .await
    .map(|_| ())
}

/// Updates a container's metadata.
pub async fn post_container(
    client: &Client,
    session: &Session,
    container: &str,
    headers: &Headers,
) -> Result<()> {
    simple(
        client,
        session,
        Method::POST,
        "Container POST failed",
        Some(container),
        None,
        Some(headers),
    )
    .await
    .map(|_| ())
}

/// Deletes a container.
pub async fn delete_container(
    client: &Client,
    session: &Session,
    container: &str,
) -> Result<()> {
    simple(
        client,
        session,
        Method::DELETE,
        "Container DELETE failed",
        Some(container),
        None,
        None,
    )
    .await
    .map(|_| ())
}

/// Fetches an object. The body is returned as a lazy chunk sequence;
/// drain it fully before reusing the session.
pub async fn get_object(
    client: &Client,
    session: &Session,
    container: &str,
    name: &str,
) -> Result<(Headers, ObjectBody)> {
    let url = resource(session, Some(container), Some(name), None);
    let resp = client
        .get(url.clone())
        .header("x-auth-token", &session.token)
        .send()
        .await
        .map_err(transport)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(failed("Object GET failed", &url, None, status));
    }
    let headers = lower_headers(&resp);
    Ok((headers, ObjectBody { resp }))
}

/// Object info.
pub async fn head_object(
    client: &Client,
    session: &Session,
    container: &str,
    name: &str,
) -> Result<Headers> {
    simple(
        client,
        session,
        Method::HEAD,
        "Object HEAD failed",
        Some(container),
        Some(name),
        None,
    )
    .await
}

/// Stores an object and returns the server's ETag, quote-stripped.
pub async fn put_object(
    client: &Client,
    session: &Session,
    container: &str,
    name: &str,
    body: PutBody,
    content_type: Option<&str>,
    extra: Option<&Headers>,
) -> Result<String> {
    let url = resource(session, Some(container), Some(name), None);
    let mut req = client
        .put(url.clone())
        .header("x-auth-token", &session.token);
    if let Some(content_type) = content_type {
        req = req.header("content-type", content_type);
    }
    if let Some(extra) = extra {
        for (header, value) in extra {
            req = req.header(header, value);
        }
    }
    req = match body {
        PutBody::Buffered(bytes) => req.body(bytes),
        PutBody::Stream { reader, length } => {
            if let Some(length) = length {
                // An explicit Content-Length makes the transport frame
                // the body as exactly that many bytes.
                req = req.header("content-length", length);
            }
            req.body(reqwest::Body::wrap_stream(ReaderStream::new(reader)))
        }
    };
    let resp = req.send().await.map_err(transport)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(failed("Object PUT failed", &url, None, status));
    }
    let headers = lower_headers(&resp);
    Ok(headers
        .get("etag")
        .map(|etag| etag.trim_matches('"').to_string())
        .unwrap_or_default())
}

/// Updates object metadata.
pub async fn post_object(
    client: &Client,
    session: &Session,
    container: &str,
    name: &str,
    headers: &Headers,
) -> Result<()> {
    simple(
        client,
        session,
        Method::POST,
        "Object POST failed",
        Some(container),
        Some(name),
        Some(headers),
    )
    .await
    .map(|_| ())
}

/// Deletes an object.
pub async fn delete_object(
    client: &Client,
    session: &Session,
    container: &str,
    name: &str,
) -> Result<()> {
    simple(
        client,
        session,
        Method::DELETE,
        "Object DELETE failed",
        Some(container),
        Some(name),
        None,
    )
    .await
    .map(|_| ())
}
