use crate::error::{Error, Result};
use crate::util::is_dot_segment;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, LOCATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use slog::{debug, Logger};
use std::str::FromStr;
use std::time::Duration;

/// Client carries the connection to a webtask cluster: the base URL, the bearer token
/// sent with every administrative request, and the prebuilt HTTP clients.  Once
/// created, a Client is immutable.
pub(crate) struct Client {
    /// The base URL for requests, always ending in `/`
    base_url: reqwest::Url,

    /// Value of the `Authorization` header
    authorization: HeaderValue,

    logger: Logger,

    /// Reqwest client for administrative calls; does not follow redirects
    client: reqwest::Client,

    /// Reqwest client for webtask invocation; follows redirects
    invoker: reqwest::Client,

    /// Reqwest client for long-lived streams; only connecting is subject to the timeout
    streamer: reqwest::Client,
}

impl Client {
    pub(crate) fn new(url: &str, token: &str, timeout: Duration, logger: Logger) -> Result<Self> {
        let mut base_url = reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("while parsing {}: {}", url, e)))?;

        if base_url.host_str().is_none() {
            return Err(Error::Config(format!(
                "The webtask URL {} doesn't contain a host",
                url
            )));
        }

        // `Url::join` replaces the last path segment unless the path ends in `/`
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let authorization = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| Error::Config("token contains invalid characters".to_owned()))?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        let invoker = reqwest::Client::builder().timeout(timeout).build()?;

        let streamer = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .build()?;

        Ok(Client {
            base_url,
            authorization,
            logger,
            client,
            invoker,
            streamer,
        })
    }

    /// Make an authenticated request to the cluster.  The request URI is
    /// `<url>/<path>`, and `path` must not start with `/`.
    ///
    /// Successful responses are returned as-is; anything else is converted to an error,
    /// with the message taken from the response body where possible.
    pub(crate) async fn request(
        &self,
        method: &str,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let req = self.build_request(method, path, query, body)?;
        self.send(req).await
    }

    /// As [`request`](Client::request), parsing the response body as JSON.
    pub(crate) async fn request_json<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<&Value>,
    ) -> Result<T> {
        let resp = self.request(method, path, query, body).await?;
        read_json(resp).await
    }

    /// Execute a request built by [`build_request`](Client::build_request).
    pub(crate) async fn send(&self, req: reqwest::Request) -> Result<reqwest::Response> {
        debug!(self.logger, "webtask request"; "method" => req.method().as_str(), "path" => req.url().path());

        let resp = self.client.execute(req).await?;
        check_status(resp).await
    }

    /// Open a long-lived authenticated `GET` on `path`, accepting the given content type.
    pub(crate) async fn open_stream(&self, path: &str, accept: &str) -> Result<reqwest::Response> {
        let url = self.make_url(path, vec![])?;
        debug!(self.logger, "webtask stream"; "method" => "GET", "path" => url.path());

        let req = self
            .streamer
            .get(url)
            .header(AUTHORIZATION, self.authorization.clone())
            .header(ACCEPT, accept)
            .build()?;
        let resp = self.streamer.execute(req).await?;
        check_status(resp).await
    }

    pub(crate) fn build_request(
        &self,
        method: &str,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let url = self.make_url(path, query)?;

        let meth = reqwest::Method::from_str(method)
            .map_err(|_| Error::Validation(format!("invalid HTTP method {}", method)))?;

        let mut req = self
            .client
            .request(meth, url)
            .header(AUTHORIZATION, self.authorization.clone());

        // pass content-length: 0 if there is no body.  This is implicit for GET requests,
        // but not for methods that typically have a body.
        if body.is_none() {
            req = req.header("Content-Length", "0");
        }

        let req = match body {
            Some(b) => req.json(&b),
            None => req,
        };

        Ok(req.build()?)
    }

    /// Make a URL for the given path, constructed as for [`request`](Client::request).
    pub(crate) fn make_url(
        &self,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<reqwest::Url> {
        if path.starts_with('/') {
            return Err(Error::Validation(
                "Request path must not begin with `/`".to_owned(),
            ));
        }
        if path.split('/').any(is_dot_segment) {
            return Err(Error::Validation(format!(
                "Request path {} must not contain `.` or `..` segments",
                path
            )));
        }

        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| Error::Validation(format!("invalid request path {}: {}", path, e)))?;

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Invoke a webtask URL.  No credentials are attached, redirects are followed, and the
    /// response is returned whatever its status.
    pub(crate) async fn invoke(
        &self,
        method: &str,
        url: reqwest::Url,
        headers: reqwest::header::HeaderMap,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let meth = reqwest::Method::from_str(method)
            .map_err(|_| Error::Validation(format!("invalid HTTP method {}", method)))?;

        debug!(self.logger, "webtask invocation"; "method" => meth.as_str(), "path" => url.path());

        let mut req = self.invoker.request(meth, url).headers(headers);
        if let Some(b) = body {
            req = req.json(b);
        }
        Ok(req.send().await?)
    }

    pub(crate) fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }
}

/// Read a successful response as JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::InvalidResponse(e.to_string()))
}

/// Read a successful response as JSON, treating an empty body as `null`.
pub(crate) async fn read_optional_json(resp: reqwest::Response) -> Result<Value> {
    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| Error::InvalidResponse(e.to_string()))
}

/// Convert a non-successful response into the matching error.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();

    if status.is_success() {
        Ok(resp)
    } else if status.is_client_error() {
        let message = error_message(resp).await;
        Err(Error::Client { status, message })
    } else if status.is_server_error() {
        let message = error_message(resp).await;
        Err(Error::Server { status, message })
    } else {
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|l| l.to_str().ok())
            .map(str::to_owned);
        Err(Error::UnexpectedResponseType { status, location })
    }
}

/// Extract a human-readable message from an error response: the `message` property of a
/// JSON body, else the body text, else the canonical reason.
async fn error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();

    if let Ok(json) = serde_json::from_str::<Value>(&text) {
        if let Some(message) = json.get("message").and_then(Value::as_str) {
            return message.to_owned();
        }
    }

    if text.is_empty() {
        status_reason(status)
    } else {
        text
    }
}

fn status_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_owned)
        .unwrap_or_else(|| status.as_str().to_owned())
}
