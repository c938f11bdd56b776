//! Retrying session wrapper around the protocol functions.
//!
//! One `Connection` per concurrent worker; sessions are never shared
//! across tasks. The wrapper owns the auth lifecycle (Unauthenticated →
//! Authenticated → Invalidated → Unauthenticated) and the retry budget
//! for transient failures.

use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use st_core::{Credentials, Error, Result};

use crate::listing::{ContainerRecord, ObjectEntry};
use crate::protocol::{self, Headers, ObjectBody, PutBody, Session};

/// Extra attempts after the first failure.
pub const DEFAULT_RETRIES: u32 = 5;

/// A body that can be reopened for each PUT attempt, so a retried
/// upload always resends from the start of its slice.
#[derive(Debug, Clone)]
pub enum BodySource {
    Buffered(Bytes),
    /// A byte range of a local file, opened and seeked independently
    /// per attempt.
    File { path: PathBuf, offset: u64, len: u64 },
}

impl BodySource {
    pub fn empty() -> Self {
        BodySource::Buffered(Bytes::new())
    }

    pub fn len(&self) -> u64 {
        match self {
            BodySource::Buffered(bytes) => bytes.len() as u64,
            BodySource::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn open(&self) -> Result<PutBody> {
        match self {
            BodySource::Buffered(bytes) => Ok(PutBody::Buffered(bytes.clone())),
            BodySource::File { path, offset, len } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(*offset)).await?;
                Ok(PutBody::Stream {
                    reader: Box::new(file.take(*len)),
                    length: Some(*len),
                })
            }
        }
    }
}

/// A client session that retries requests.
#[derive(Debug, Clone)]
pub struct Connection {
    credentials: Credentials,
    retries: u32,
    backoff_unit: Duration,
    client: Option<Client>,
    session: Option<Session>,
    attempts: u32,
}

impl Connection {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            retries: DEFAULT_RETRIES,
            backoff_unit: Duration::from_secs(1),
            client: None,
            session: None,
            attempts: 0,
        }
    }

    /// A connection that reuses an already-acquired session instead of
    /// authenticating on first use.
    pub fn preauthenticated(credentials: Credentials, session: Session) -> Self {
        Self {
            session: Some(session),
            ..Self::new(credentials)
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// The base sleep of the exponential backoff. Production default is
    /// one second; tests shrink it.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Attempts made by the most recent wrapped call.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The cached session, if this connection has authenticated.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Authenticates if needed and returns the session.
    pub async fn authenticate(&mut self) -> Result<Session> {
        let (_, session) = self.ensure().await?;
        Ok(session)
    }

    async fn ensure(&mut self) -> Result<(Client, Session)> {
        let client = self.client.get_or_insert_with(Client::new).clone();
        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                let session = protocol::get_auth(&client, &self.credentials).await?;
                self.session = Some(session.clone());
                session
            }
        };
        Ok((client, session))
    }

    /// Runs one protocol call with the session's retry policy:
    /// transport errors invalidate the HTTP client and retry; a 401
    /// clears the cached session and retries once; 5xx retries; any
    /// other status is immediately fatal. Sleeps with exponentially
    /// doubling backoff between attempts until the budget is spent.
    async fn retry<T, F, Fut>(&mut self, op: F) -> Result<T>
    where
        F: Fn(Client, Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.attempts = 0;
        let mut backoff = self.backoff_unit;
        loop {
            self.attempts += 1;
            let outcome = match self.ensure().await {
                Ok((client, session)) => op(client, session).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(Error::Transport(err)) => {
                    if self.attempts > self.retries {
                        return Err(Error::Transport(err));
                    }
                    self.client = None;
                }
                Err(Error::Protocol(err)) => {
                    if self.attempts > self.retries {
                        return Err(err.into());
                    }
                    match err.status {
                        401 => {
                            self.session = None;
                            if self.attempts > 1 {
                                return Err(err.into());
                            }
                        }
                        500..=599 => {}
                        _ => return Err(err.into()),
                    }
                }
                Err(err) => return Err(err),
            }
            tracing::debug!(
                attempt = self.attempts,
                backoff_ms = backoff.as_millis() as u64,
                "retrying after transient failure"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    pub async fn head_account(&mut self) -> Result<Headers> {
        self.retry(|client, session| async move {
            protocol::head_account(&client, &session).await
        })
        .await
    }

    async fn account_page(
        &mut self,
        marker: Option<&str>,
        limit: Option<u64>,
        prefix: Option<&str>,
    ) -> Result<(Headers, Vec<ContainerRecord>)> {
        let marker = marker.map(str::to_owned);
        let prefix = prefix.map(str::to_owned);
        self.retry(move |client, session| {
            let marker = marker.clone();
            let prefix = prefix.clone();
            async move {
                protocol::get_account(
                    &client,
                    &session,
                    marker.as_deref(),
                    limit,
                    prefix.as_deref(),
                )
                .await
            }
        })
        .await
    }

    /// Container listing for the account. In full-listing mode the call
    /// is re-issued with the marker advanced to the last record's name
    /// until a page comes back empty; a page retried after a transient
    /// failure restarts from the last committed marker.
    pub async fn get_account(
        &mut self,
        marker: Option<&str>,
        limit: Option<u64>,
        prefix: Option<&str>,
        full_listing: bool,
    ) -> Result<(Headers, Vec<ContainerRecord>)> {
        let (headers, mut listing) = self.account_page(marker, limit, prefix).await?;
        if full_listing {
            while let Some(marker) = listing.last().map(|record| record.name.clone()) {
                let (_, page) = self.account_page(Some(&marker), limit, prefix).await?;
                if page.is_empty() {
                    break;
                }
                listing.extend(page);
            }
        }
        Ok((headers, listing))
    }

    pub async fn post_account(&mut self, headers: Headers) -> Result<()> {
        self.retry(move |client, session| {
            let headers = headers.clone();
            async move { protocol::post_account(&client, &session, &headers).await }
        })
        .await
    }

    pub async fn head_container(&mut self, container: &str) -> Result<Headers> {
        let container = container.to_owned();
        self.retry(move |client, session| {
            let container = container.clone();
            async move { protocol::head_container(&client, &session, &container).await }
        })
        .await
    }

    async fn container_page(
        &mut self,
        container: &str,
        marker: Option<&str>,
        limit: Option<u64>,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> Result<(Headers, Vec<ObjectEntry>)> {
        let container = container.to_owned();
        let marker = marker.map(str::to_owned);
        let prefix = prefix.map(str::to_owned);
        let delimiter = delimiter.map(str::to_owned);
        self.retry(move |client, session| {
            let container = container.clone();
            let marker = marker.clone();
            let prefix = prefix.clone();
            let delimiter = delimiter.clone();
            async move {
                protocol::get_container(
                    &client,
                    &session,
                    &container,
                    marker.as_deref(),
                    limit,
                    prefix.as_deref(),
                    delimiter.as_deref(),
                )
                .await
            }
        })
        .await
    }

    /// Object listing for a container; same marker advancement as
    /// [`Connection::get_account`], except rolled-up entries advance by
    /// their subdir prefix.
    pub async fn get_container(
        &mut self,
        container: &str,
        marker: Option<&str>,
        limit: Option<u64>,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        full_listing: bool,
    ) -> Result<(Headers, Vec<ObjectEntry>)> {
        let (headers, mut listing) = self
            .container_page(container, marker, limit, prefix, delimiter)
            .await?;
        if full_listing {
            while let Some(marker) = listing.last().map(|entry| entry.marker().to_owned()) {
                let (_, page) = self
                    .container_page(container, Some(&marker), limit, prefix, delimiter)
                    .await?;
                if page.is_empty() {
                    break;
                }
                listing.extend(page);
            }
        }
        Ok((headers, listing))
    }

    pub async fn put_container(&mut self, container: &str, headers: Headers) -> Result<()> {
        let container = container.to_owned();
        self.retry(move |client, session| {
            let container = container.clone();
            let headers = headers.clone();
            async move { protocol::put_container(&client, &session, &container, &headers).await }
        })
        .await
    }

    pub async fn post_container(&mut self, container: &str, headers: Headers) -> Result<()> {
        let container = container.to_owned();
        self.retry(move |client, session| {
            let container = container.clone();
            let headers = headers.clone();
            async move { protocol::post_container(&client, &session, &container, &headers).await }
        })
        .await
    }

    pub async fn delete_container(&mut self, container: &str) -> Result<()> {
        let container = container.to_owned();
        self.retry(move |client, session| {
            let container = container.clone();
            async move { protocol::delete_container(&client, &session, &container).await }
        })
        .await
    }

    pub async fn head_object(&mut self, container: &str, name: &str) -> Result<Headers> {
        let container = container.to_owned();
        let name = name.to_owned();
        self.retry(move |client, session| {
            let container = container.clone();
            let name = name.clone();
            async move { protocol::head_object(&client, &session, &container, &name).await }
        })
        .await
    }

    /// Fetches an object. Retries cover establishing the response;
    /// failures while draining the returned body are not retried.
    pub async fn get_object(
        &mut self,
        container: &str,
        name: &str,
    ) -> Result<(Headers, ObjectBody)> {
        let container = container.to_owned();
        let name = name.to_owned();
        self.retry(move |client, session| {
            let container = container.clone();
            let name = name.clone();
            async move { protocol::get_object(&client, &session, &container, &name).await }
        })
        .await
    }

    /// Stores an object, reopening the body source for each attempt.
    /// Returns the server's ETag.
    pub async fn put_object(
        &mut self,
        container: &str,
        name: &str,
        source: BodySource,
        content_type: Option<&str>,
        headers: Headers,
    ) -> Result<String> {
        let container = container.to_owned();
        let name = name.to_owned();
        let content_type = content_type.map(str::to_owned);
        self.retry(move |client, session| {
            let container = container.clone();
            let name = name.clone();
            let source = source.clone();
            let content_type = content_type.clone();
            let headers = headers.clone();
            async move {
                let body = source.open().await?;
                protocol::put_object(
                    &client,
                    &session,
                    &container,
                    &name,
                    body,
                    content_type.as_deref(),
                    Some(&headers),
                )
                .await
            }
        })
        .await
    }

    pub async fn post_object(
        &mut self,
        container: &str,
        name: &str,
        headers: Headers,
    ) -> Result<()> {
        let container = container.to_owned();
        let name = name.to_owned();
        self.retry(move |client, session| {
            let container = container.clone();
            let name = name.clone();
            let headers = headers.clone();
            async move {
                protocol::post_object(&client, &session, &container, &name, &headers).await
            }
        })
        .await
    }

    pub async fn delete_object(&mut self, container: &str, name: &str) -> Result<()> {
        let container = container.to_owned();
        let name = name.to_owned();
        self.retry(move |client, session| {
            let container = container.clone();
            let name = name.clone();
            async move { protocol::delete_object(&client, &session, &container, &name).await }
        })
        .await
    }
}
