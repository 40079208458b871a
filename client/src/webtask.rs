use crate::claims::{decode_token, resolve_container, Claims, CodeSource, CreateOptions, StringMap};
use crate::cron::{CronJob, CronJobOptions};
use crate::error::{Error, Result};
use crate::logs::{LogStream, LogStreamOptions};
use crate::profile::{InspectOptions, ListOptions, Profile, Target};
use crate::storage::Storage;
use crate::update::UpdateOptions;
use crate::util::{api_path, urlencode};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use slog::debug;
use std::collections::BTreeMap;

/// A Webtask is a handle on one issued webtask token.  Its claims are decoded once, when
/// the handle is created; everything else is derived from them and from the profile
/// that created it.
#[derive(Debug, Clone)]
pub struct Webtask {
    profile: Profile,
    token: String,
    claims: Claims,
    meta: StringMap,
    container: Option<String>,
    webtask_url: Option<String>,
}

/// The representation of a webtask in cluster responses
#[derive(Debug, Deserialize)]
pub(crate) struct WebtaskDescriptor {
    pub(crate) token: String,
    #[serde(default)]
    pub(crate) meta: Option<StringMap>,
    #[serde(default)]
    pub(crate) webtask_url: Option<String>,
}

impl Webtask {
    /// Create a handle for an existing token.
    pub fn from_token<S: Into<String>>(profile: &Profile, token: S) -> Result<Webtask> {
        Webtask::new(profile, token.into(), StringMap::new(), None, None)
    }

    pub(crate) fn new(
        profile: &Profile,
        token: String,
        meta: StringMap,
        container: Option<String>,
        webtask_url: Option<String>,
    ) -> Result<Webtask> {
        let claims = decode_token(&token)?;
        Ok(Webtask {
            profile: profile.clone(),
            token,
            claims,
            meta,
            container,
            webtask_url,
        })
    }

    fn from_descriptor(
        profile: &Profile,
        descriptor: WebtaskDescriptor,
        container: Option<String>,
    ) -> Result<Webtask> {
        Webtask::new(
            profile,
            descriptor.token,
            descriptor.meta.unwrap_or_default(),
            container,
            descriptor.webtask_url,
        )
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The claims embedded in the token, as decoded (not verified) locally
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn meta(&self) -> &StringMap {
        &self.meta
    }

    /// The webtask's name (`jtn` claim); unnamed webtasks return None
    pub fn name(&self) -> Option<&str> {
        self.claims.jtn.as_deref().filter(|n| !n.is_empty())
    }

    fn custom_host(&self) -> Option<&str> {
        self.claims.host.as_deref().filter(|h| !h.is_empty())
    }

    pub fn container(&self) -> &str {
        self.container
            .as_deref()
            .unwrap_or_else(|| self.profile.container())
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// The URL at which this webtask can be invoked.
    ///
    /// Unnamed webtasks carry their token as a `key` query parameter.
    pub fn url(&self) -> String {
        if let Some(ref url) = self.webtask_url {
            return url.clone();
        }

        let container = urlencode(self.container());
        let mut url = match self.custom_host() {
            Some(host) => {
                let cluster = self.profile.client().base_url();
                let port = cluster
                    .port()
                    .map(|p| format!(":{}", p))
                    .unwrap_or_default();
                format!("{}://{}{}/{}", cluster.scheme(), host, port, container)
            }
            None => format!("{}/api/run/{}", self.profile.url(), container),
        };

        match self.name() {
            Some(name) => {
                url.push('/');
                url.push_str(&urlencode(name).to_string());
            }
            None => {
                url.push_str("?key=");
                url.push_str(&self.token);
            }
        }
        url
    }

    /// Invoke the webtask.  Every HTTP response is returned as an [`InvocationResponse`],
    /// whatever its status; only transport failures produce an error.
    pub async fn run(&self, options: RunOptions) -> Result<InvocationResponse> {
        let mut url = reqwest::Url::parse(&self.url())
            .map_err(|e| Error::Validation(format!("invalid webtask URL: {}", e)))?;

        let path = join_path(url.path(), &options.path);
        url.set_path(&path);

        let mut query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        query.extend(options.query);
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::Validation(format!("invalid header name {}", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::Validation(format!("invalid value for header {}", name)))?;
            headers.insert(name, value);
        }

        let resp = self
            .profile
            .client()
            .invoke(&options.method, url, headers, options.body.as_ref())
            .await?;

        let status_code = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();

        Ok(InvocationResponse {
            status_code,
            headers,
            body,
        })
    }

    /// Schedule this webtask.  Without an explicit name, the job is named after the
    /// webtask, or failing that the last path segment of its code URL.
    pub async fn create_cron_job(&self, spec: CronJobSpec) -> Result<CronJob> {
        let name = spec
            .name
            .or_else(|| self.name().map(str::to_owned))
            .or_else(|| self.claims.url.as_deref().map(code_url_basename))
            .filter(|n| !n.is_empty())
            .ok_or(Error::MissingJobName)?;

        self.profile
            .create_cron_job(CronJobOptions {
                container: Some(self.container().to_owned()),
                name,
                token: self.token.clone(),
                schedule: spec.schedule,
                state: Some(spec.state.unwrap_or_else(|| "active".to_owned())),
                meta: Some(spec.meta.unwrap_or_else(|| self.meta.clone())),
                tz: spec.tz,
            })
            .await
    }

    /// Inspect this webtask's token on the cluster.
    pub async fn inspect(&self, options: &InspectOptions) -> Result<Claims> {
        self.profile.inspect_token(&self.token, options).await
    }

    /// Remove this (named) webtask from its container.
    pub async fn remove(&self) -> Result<bool> {
        let name = self.name().ok_or(Error::UnremovableWebtask)?;
        self.profile
            .remove_webtask(&self.target(name))
            .await
    }

    /// Revoke this webtask's token.
    pub async fn revoke(&self) -> Result<()> {
        self.profile.revoke_token(&self.token).await
    }

    /// Update this webtask; the name is always that of this webtask.
    pub async fn update(&self, mut options: UpdateOptions) -> Result<Webtask> {
        options.name = self.name().map(str::to_owned);
        if options.container.is_none() {
            options.container = self.container.clone();
        }
        self.profile.update_webtask(options).await
    }

    pub async fn update_storage(&self, storage: &Storage) -> Result<Value> {
        self.profile
            .update_storage(storage, &self.storage_target())
            .await
    }

    pub async fn get_storage(&self) -> Result<Storage> {
        self.profile.get_storage(&self.storage_target()).await
    }

    /// Stream the logs of this webtask's container.
    pub fn create_log_stream(&self) -> LogStream {
        self.profile.create_log_stream(&LogStreamOptions {
            container: Some(self.container().to_owned()),
        })
    }

    fn target(&self, name: &str) -> Target {
        Target::named(name).container(self.container())
    }

    fn storage_target(&self) -> Target {
        Target {
            name: self.name().map(str::to_owned),
            container: Some(self.container().to_owned()),
        }
    }
}

impl Serialize for Webtask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Repr<'a> {
            container: &'a str,
            token: &'a str,
            url: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            name: Option<&'a str>,
        }

        Repr {
            container: self.container(),
            token: &self.token,
            url: self.url(),
            name: self.name(),
        }
        .serialize(serializer)
    }
}

/// The last path segment of a code URL, or an empty string.
fn code_url_basename(code_url: &str) -> String {
    reqwest::Url::parse(code_url)
        .ok()
        .and_then(|u| {
            u.path()
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .map(str::to_owned)
        })
        .unwrap_or_default()
}

/// Join `path` onto `base`, resolving `.` and `..` segments.
fn join_path(base: &str, path: &str) -> String {
    let mut segments: Vec<&str> = vec![];
    for segment in base.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut joined = format!("/{}", segments.join("/"));
    if path.ends_with('/') && joined.len() > 1 {
        joined.push('/');
    }
    joined
}

/// Options for invoking a webtask.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// HTTP method; defaults to `GET`
    pub method: String,
    /// Path appended to the webtask URL
    pub path: String,
    /// Query parameters, overriding any already present in the webtask URL
    pub query: BTreeMap<String, String>,
    /// JSON request body
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_owned(),
            path: String::new(),
            query: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<S: Into<String>>(mut self, method: S) -> Self {
        self.method = method.into();
        self
    }

    pub fn path<S: Into<String>>(mut self, path: S) -> Self {
        self.path = path.into();
        self
    }

    pub fn query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// The response to a webtask invocation.
#[derive(Debug, Clone)]
pub struct InvocationResponse {
    pub status_code: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl InvocationResponse {
    /// The body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

/// Options for scheduling a webtask with [`Webtask::create_cron_job`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronJobSpec {
    /// Cron schedule, e.g. `*/5 * * * *`
    pub schedule: String,
    /// Job name; defaults to the webtask's name
    pub name: Option<String>,
    /// Initial state; defaults to `active`
    pub state: Option<String>,
    /// Job metadata; defaults to the webtask's metadata
    pub meta: Option<StringMap>,
    /// IANA timezone of the schedule
    pub tz: Option<String>,
}

impl CronJobSpec {
    pub fn new<S: Into<String>>(schedule: S) -> Self {
        Self {
            schedule: schedule.into(),
            ..Self::default()
        }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Profile {
    /// Create a webtask from the given options.  Unless `include_webtask_url` is false,
    /// the handle uses the invocation URL reported by the cluster.
    pub async fn create(&self, options: &CreateOptions) -> Result<Webtask> {
        let issued = self.create_token_with_url(options).await?;
        let webtask_url = if options.include_webtask_url.unwrap_or(true) {
            issued.webtask_url
        } else {
            None
        };
        Webtask::new(
            self,
            issued.token,
            options.meta.clone(),
            options.container.clone(),
            webtask_url,
        )
    }

    /// Create a webtask whose code is the given string, or is fetched from it if it is a
    /// URL.
    pub async fn create_from<S: Into<String>>(
        &self,
        code_or_url: S,
        options: CreateOptions,
    ) -> Result<Webtask> {
        let options = match CodeSource::classify(code_or_url) {
            CodeSource::Code(code) => options.code(code),
            CodeSource::Url(url) => options.code_url(url),
        };
        self.create(&options).await
    }

    /// Create a webtask from an already-built set of claims.
    pub async fn create_raw(&self, claims: &Claims, include_webtask_url: bool) -> Result<Webtask> {
        let issued = self.create_token_raw(claims).await?;
        let container = resolve_container(claims.ten.as_ref()).ok();
        Webtask::new(
            self,
            issued.token,
            claims.meta.clone().unwrap_or_default(),
            container,
            if include_webtask_url {
                issued.webtask_url
            } else {
                None
            },
        )
    }

    /// Create a webtask and return its invocation URL.
    pub async fn create_url<S: Into<String>>(
        &self,
        code_or_url: S,
        options: CreateOptions,
    ) -> Result<String> {
        Ok(self.create_from(code_or_url, options).await?.url())
    }

    /// Create a webtask and invoke it.
    pub async fn run<S: Into<String>>(
        &self,
        code_or_url: S,
        options: CreateOptions,
        run: RunOptions,
    ) -> Result<InvocationResponse> {
        self.create_from(code_or_url, options).await?.run(run).await
    }

    /// Read a named webtask.
    pub async fn get_webtask(&self, target: &Target) -> Result<Webtask> {
        let (container, name) = target.resolve(self)?;
        let descriptor: WebtaskDescriptor = self
            .client()
            .request_json(
                "GET",
                &api_path(&["api", "webtask", container, name]),
                vec![],
                None,
            )
            .await?;
        Webtask::from_descriptor(self, descriptor, target.container.clone())
    }

    /// Remove a named webtask.
    pub async fn remove_webtask(&self, target: &Target) -> Result<bool> {
        let (container, name) = target.resolve(self)?;
        self.client()
            .request(
                "DELETE",
                &api_path(&["api", "webtask", container, name]),
                vec![],
                None,
            )
            .await?;
        debug!(self.logger(), "removed webtask"; "name" => name);
        Ok(true)
    }

    /// List the named webtasks in a container.
    pub async fn list_webtasks(&self, options: &ListOptions) -> Result<Vec<Webtask>> {
        let container = options.container.as_deref().unwrap_or(self.container());
        let descriptors: Vec<WebtaskDescriptor> = self
            .client()
            .request_json(
                "GET",
                &api_path(&["api", "webtask", container]),
                options.query(),
                None,
            )
            .await?;
        descriptors
            .into_iter()
            .map(|d| Webtask::from_descriptor(self, d, options.container.clone()))
            .collect()
    }

    /// Inspect a named webtask.
    pub async fn inspect_webtask(
        &self,
        target: &Target,
        options: &InspectOptions,
    ) -> Result<Claims> {
        self.get_webtask(target).await?.inspect(options).await
    }
}
