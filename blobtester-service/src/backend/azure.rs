//! Azure Blob Storage backend talking to the REST API directly.
//!
//! Requests are authorized with the account's Shared Key. See
//! <https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key>.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Method, Response, StatusCode, Url};
use sha2::Sha256;

use crate::backend::{Backend, PayloadStream};
use crate::error::{BackendError, BackendResult};

/// REST API version sent with every request.
const API_VERSION: &str = "2021-08-06";

type HmacSha256 = Hmac<Sha256>;

/// Name and key of a storage account.
#[derive(Clone)]
pub struct AzureCredentials {
    account_name: String,
    account_key: String,
}

impl AzureCredentials {
    /// Creates credentials from an account name and its base64-encoded access key.
    pub fn new(account_name: impl Into<String>, account_key: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            account_key: account_key.into(),
        }
    }

    /// The storage account name.
    pub fn account_name(&self) -> &str {
        &self.account_name
    }
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("account_name", &self.account_name)
            .field("account_key", &"[redacted]")
            .finish()
    }
}

/// A [`Backend`] for Azure Blob Storage using block blobs.
pub struct AzureBackend {
    client: reqwest::Client,
    account: String,
    key: Vec<u8>,
    base_url: Url,
}

impl AzureBackend {
    /// Creates a backend for the given account.
    ///
    /// Without an explicit `endpoint`, requests go to the public account endpoint, using `https`
    /// if `use_https` is set. An explicit endpoint is addressed path-style, which is what storage
    /// emulators expect.
    pub fn new(
        credentials: AzureCredentials,
        use_https: bool,
        endpoint: Option<String>,
    ) -> BackendResult<Self> {
        let AzureCredentials {
            account_name,
            account_key,
        } = credentials;

        if account_name.is_empty() {
            return Err(BackendError::InvalidCredentials(
                "account name is empty".into(),
            ));
        }
        let key = BASE64
            .decode(account_key.trim())
            .map_err(|err| BackendError::InvalidCredentials(err.to_string()))?;
        if key.is_empty() {
            return Err(BackendError::InvalidCredentials(
                "access key is empty".into(),
            ));
        }

        let endpoint = endpoint.unwrap_or_else(|| {
            let scheme = if use_https { "https" } else { "http" };
            format!("{scheme}://{account_name}.blob.core.windows.net")
        });
        let base_url = parse_base_url(&endpoint)?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("blobtester/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| BackendError::reqwest("failed to build http client", err))?;

        Ok(Self {
            client,
            account: account_name,
            key,
            base_url,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorization(
        &self,
        method: &Method,
        url: &Url,
        content_length: u64,
        ms_headers: &BTreeMap<&'static str, String>,
    ) -> String {
        let to_sign = string_to_sign(
            method.as_str(),
            content_length,
            ms_headers,
            &self.account,
            url,
        );
        let signature = sign(&self.key, &to_sign);
        format!("SharedKey {}:{signature}", self.account)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        blob_type: Option<&'static str>,
        body: Option<(u64, PayloadStream)>,
    ) -> BackendResult<Response> {
        let mut ms_headers = BTreeMap::new();
        ms_headers.insert("x-ms-date", http_date());
        ms_headers.insert("x-ms-version", API_VERSION.to_owned());
        if let Some(blob_type) = blob_type {
            ms_headers.insert("x-ms-blob-type", blob_type.to_owned());
        }

        let content_length = body.as_ref().map_or(0, |(len, _)| *len);
        let authorization = self.authorization(&method, &url, content_length, &ms_headers);

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("authorization", authorization);
        for (name, value) in &ms_headers {
            request = request.header(*name, value);
        }
        request = match body {
            Some((len, stream)) => request
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(stream)),
            None if method == Method::PUT => request.body(Bytes::new()),
            None => request,
        };

        request
            .send()
            .await
            .map_err(|err| BackendError::reqwest(format!("{method} request failed"), err))
    }
}

impl fmt::Debug for AzureBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBackend")
            .field("account", &self.account)
            .field("endpoint", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Backend for AzureBackend {
    fn name(&self) -> &'static str {
        "azure"
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn create_container(&self, container: &str) -> BackendResult<()> {
        validate_container_name(container)?;

        let mut url = self.url(&[container]);
        url.set_query(Some("restype=container"));

        let response = self.send(Method::PUT, url, None, None).await?;
        match response.status() {
            StatusCode::CREATED => {
                tracing::info!(container, "created container");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            _ => Err(status_error("create container", response).await),
        }
    }

    #[tracing::instrument(level = "trace", skip(self, stream))]
    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        len: u64,
        stream: PayloadStream,
    ) -> BackendResult<()> {
        validate_blob_name(blob)?;

        let url = self.url(&[container, blob]);
        let response = self
            .send(Method::PUT, url, Some("BlockBlob"), Some((len, stream)))
            .await?;
        if response.status() != StatusCode::CREATED {
            return Err(status_error("put blob", response).await);
        }
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get_blob(&self, container: &str, blob: &str) -> BackendResult<Option<PayloadStream>> {
        validate_blob_name(blob)?;

        let url = self.url(&[container, blob]);
        let response = self.send(Method::GET, url, None, None).await?;
        match response.status() {
            StatusCode::OK => {
                let stream = response
                    .bytes_stream()
                    .map_err(std::io::Error::other)
                    .boxed();
                Ok(Some(stream))
            }
            StatusCode::NOT_FOUND => {
                tracing::debug!("blob not found");
                Ok(None)
            }
            _ => Err(status_error("get blob", response).await),
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete_blob(&self, container: &str, blob: &str) -> BackendResult<()> {
        validate_blob_name(blob)?;

        let url = self.url(&[container, blob]);
        let response = self.send(Method::DELETE, url, None, None).await?;
        match response.status() {
            StatusCode::ACCEPTED | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error("delete blob", response).await),
        }
    }
}

fn parse_base_url(endpoint: &str) -> BackendResult<Url> {
    let url = Url::parse(endpoint).map_err(|_| BackendError::InvalidName {
        name: endpoint.to_owned(),
        reason: "not a valid url",
    })?;
    if url.cannot_be_a_base() {
        return Err(BackendError::InvalidName {
            name: endpoint.to_owned(),
            reason: "endpoint cannot be a base url",
        });
    }
    Ok(url)
}

async fn status_error(context: &str, response: Response) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    BackendError::Status {
        context: context.to_owned(),
        status,
        body,
    }
}

/// Formats the current time as an RFC 1123 date, as required by `x-ms-date`.
fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Builds the Shared Key string-to-sign for a request without standard content headers.
fn string_to_sign(
    verb: &str,
    content_length: u64,
    ms_headers: &BTreeMap<&'static str, String>,
    account: &str,
    url: &Url,
) -> String {
    // A zero length is signed as an empty string.
    let content_length = match content_length {
        0 => String::new(),
        len => len.to_string(),
    };

    let mut to_sign = String::new();
    // verb, content-encoding, content-language, content-length, content-md5, content-type, date,
    // if-modified-since, if-match, if-none-match, if-unmodified-since, range
    for line in [
        verb,
        "",
        "",
        &content_length,
        "",
        "",
        "",
        "",
        "",
        "",
        "",
        "",
    ] {
        to_sign.push_str(line);
        to_sign.push('\n');
    }

    for (name, value) in ms_headers {
        to_sign.push_str(&format!("{name}:{}\n", value.trim()));
    }

    to_sign.push('/');
    to_sign.push_str(account);
    to_sign.push_str(url.path());

    let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        query
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in query {
        values.sort();
        to_sign.push_str(&format!("\n{name}:{}", values.join(",")));
    }

    to_sign
}

fn sign(key: &[u8], to_sign: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn validate_container_name(name: &str) -> BackendResult<()> {
    let reason = if !(3..=63).contains(&name.len()) {
        "must be between 3 and 63 characters long"
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        "may only contain lowercase letters, digits and dashes"
    } else if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        "dashes must be surrounded by letters or digits"
    } else {
        return Ok(());
    };

    Err(BackendError::InvalidName {
        name: name.to_owned(),
        reason,
    })
}

fn validate_blob_name(name: &str) -> BackendResult<()> {
    let reason = if name.is_empty() || name.len() > 1024 {
        "must be between 1 and 1024 characters long"
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        "may only contain ascii letters, digits, dashes, underscores and dots"
    } else {
        return Ok(());
    };

    Err(BackendError::InvalidName {
        name: name.to_owned(),
        reason,
    })
}
