use crate::claims::{from_claims, to_claims, Claims, CreateOptions};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::util::is_dot_segment;
use reqwest::header::LOCATION;
use slog::{o, Logger};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The public webtask cluster
pub const DEFAULT_URL: &str = "https://webtask.it.auth0.com";

/// ProfileBuilder implements the builder pattern for building a [`Profile`].  A container
/// and token are always required; the cluster URL defaults to [`DEFAULT_URL`].
#[derive(Clone)]
pub struct ProfileBuilder {
    url: String,
    container: String,
    token: String,
    timeout: Duration,
    logger: Option<Logger>,
}

impl ProfileBuilder {
    pub fn new<S1: Into<String>, S2: Into<String>>(container: S1, token: S2) -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            container: container.into(),
            token: token.into(),
            timeout: Duration::from_secs(30),
            logger: None,
        }
    }

    /// Create a builder whose container is derived from the token's `ten` claim.
    pub fn from_token<S: Into<String>>(token: S) -> Result<Self> {
        let resolved = from_claims(&token.into())?;
        Ok(Self::new(resolved.container, resolved.token))
    }

    /// Set the URL of the webtask cluster
    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = url.into();
        self
    }

    /// Override the container, e.g., after [`from_token`](ProfileBuilder::from_token)
    pub fn container<S: Into<String>>(mut self, container: S) -> Self {
        self.container = container.into();
        self
    }

    /// Set the timeout for each administrative HTTP request.  The default is 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the logger to which requests are logged at debug level.  By default nothing is
    /// logged.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the resulting profile, consuming the builder
    pub fn build(self) -> Result<Profile> {
        Profile::new(self)
    }
}

/// A Profile identifies a webtask cluster, a container on it, and the token used to
/// manage that container.  Every remote operation is a method on Profile; the
/// [`Webtask`](crate::Webtask) and [`CronJob`](crate::CronJob) handles it returns call
/// back into it.
///
/// Profiles are immutable and cheap to clone.
#[derive(Clone)]
pub struct Profile {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    container: String,
    token: String,
    client: Client,
}

impl Profile {
    fn new(b: ProfileBuilder) -> Result<Profile> {
        if b.container.is_empty() {
            return Err(Error::Config(
                "A profile cannot be created without a container.".to_owned(),
            ));
        }
        if b.token.is_empty() {
            return Err(Error::Config(
                "A profile cannot be created without a token.".to_owned(),
            ));
        }

        let url = b.url.trim_end_matches('/').to_owned();
        let logger = b
            .logger
            .unwrap_or_else(|| Logger::root(slog::Discard, o!()))
            .new(o!("container" => b.container.clone()));
        let client = Client::new(&url, &b.token, b.timeout, logger)?;

        Ok(Profile {
            inner: Arc::new(Inner {
                url,
                container: b.container,
                token: b.token,
                client,
            }),
        })
    }

    /// The cluster URL, without a trailing `/`
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn container(&self) -> &str {
        &self.inner.container
    }

    pub fn token(&self) -> &str {
        &self.inner.token
    }

    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    pub(crate) fn logger(&self) -> &Logger {
        self.inner.client.logger()
    }

    /// Create a webtask token with the given options.
    pub async fn create_token(&self, options: &CreateOptions) -> Result<String> {
        Ok(self.create_token_with_url(options).await?.token)
    }

    /// Create a webtask token, also returning the invocation URL reported by the
    /// cluster.
    pub async fn create_token_with_url(&self, options: &CreateOptions) -> Result<IssuedToken> {
        let claims = to_claims(options, self.container())?;
        self.create_token_raw(&claims).await
    }

    /// Issue a token for an already-built set of claims.
    pub async fn create_token_raw(&self, claims: &Claims) -> Result<IssuedToken> {
        let body = serde_json::to_value(claims).map_err(|e| Error::Validation(e.to_string()))?;
        let resp = self
            .client()
            .request("POST", "api/tokens/issue", vec![], Some(&body))
            .await?;

        let webtask_url = resp
            .headers()
            .get(LOCATION)
            .and_then(|l| l.to_str().ok())
            .map(str::to_owned);
        let token = resp.text().await?.trim().to_owned();

        Ok(IssuedToken { token, webtask_url })
    }

    /// Inspect a token, resolving its claims on the cluster.
    pub async fn inspect_token(&self, token: &str, options: &InspectOptions) -> Result<Claims> {
        let mut query = vec![("token".to_owned(), token.to_owned())];
        query.extend(options.query());
        self.client()
            .request_json("GET", "api/tokens/inspect", query, None)
            .await
    }

    /// Revoke a token.
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        self.client()
            .request(
                "POST",
                "api/tokens/revoke",
                vec![("token".to_owned(), token.to_owned())],
                None,
            )
            .await?;
        Ok(())
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("url", &self.inner.url)
            .field("container", &self.inner.container)
            .finish_non_exhaustive()
    }
}

/// A token as issued by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// The value of the `Location` header of the issue response, if any
    pub webtask_url: Option<String>,
}

/// A named webtask or cron job.  The container defaults to the profile's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub name: Option<String>,
    pub container: Option<String>,
}

impl Target {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: Some(name.into()),
            container: None,
        }
    }

    pub fn container<S: Into<String>>(mut self, container: S) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Resolve to `(container, name)`, failing if no name was given.
    pub(crate) fn resolve<'a>(&'a self, profile: &'a Profile) -> Result<(&'a str, &'a str)> {
        let name = self
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(Error::MissingRequiredOption { option: "name" })?;
        let container = self.container.as_deref().unwrap_or(profile.container());
        if is_dot_segment(name) || is_dot_segment(container) {
            return Err(Error::Validation(format!(
                "`{}/{}` does not name a resource",
                container, name
            )));
        }
        Ok((container, name))
    }
}

/// Filters for listing webtasks or cron jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub container: Option<String>,
    /// Only return resources carrying all of these metadata pairs
    pub meta: BTreeMap<String, String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl ListOptions {
    pub(crate) fn query(&self) -> Vec<(String, String)> {
        let mut query = vec![];
        if let Some(offset) = self.offset {
            query.push(("offset".to_owned(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit".to_owned(), limit.to_string()));
        }
        query.extend(crate::util::meta_query(&self.meta));
        query
    }
}

/// What to resolve when inspecting a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InspectOptions {
    /// Decrypt the token's secrets (`ectx`)
    pub decrypt: bool,
    /// Fetch the code of tokens that reference a code URL
    pub fetch_code: bool,
    /// Include webtask metadata
    pub meta: bool,
}

impl InspectOptions {
    fn query(&self) -> Vec<(String, String)> {
        [
            ("decrypt", self.decrypt),
            ("fetch_code", self.fetch_code),
            ("meta", self.meta),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(k, _)| (k.to_owned(), "true".to_owned()))
        .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::claims::ParseBody;
    use crate::test_helpers::{fake_token, profile_for};
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    #[test]
    fn build_requires_container() {
        let err = ProfileBuilder::new("", "tok").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn build_requires_token() {
        let err = ProfileBuilder::new("c", "").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn build_rejects_bad_url() {
        let err = ProfileBuilder::new("c", "tok")
            .url("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn default_url() {
        let profile = ProfileBuilder::new("c", "tok").build().unwrap();
        assert_eq!(profile.url(), DEFAULT_URL);
        assert_eq!(profile.container(), "c");
        assert_eq!(profile.token(), "tok");
    }

    #[test]
    fn trailing_slash_trimmed() {
        let profile = ProfileBuilder::new("c", "tok")
            .url("https://wt.example.com/")
            .build()
            .unwrap();
        assert_eq!(profile.url(), "https://wt.example.com");
    }

    #[test]
    fn from_token_derives_container() {
        let token = fake_token(&json!({"ten": "/^wt-1234-[0-1]$/"}));
        let profile = ProfileBuilder::from_token(token.clone())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(profile.container(), "wt-1234-0");
        assert_eq!(profile.token(), token);
    }

    #[test]
    fn from_token_container_override() {
        let token = fake_token(&json!({"ten": "wt-1"}));
        let profile = ProfileBuilder::from_token(token)
            .unwrap()
            .container("wt-2")
            .build()
            .unwrap();
        assert_eq!(profile.container(), "wt-2");
    }

    #[test]
    fn from_token_invalid() {
        assert!(matches!(
            ProfileBuilder::from_token("Not a real jwt.").err(),
            Some(Error::InvalidToken(_))
        ));
    }

    #[test]
    fn debug_hides_token() {
        let profile = ProfileBuilder::new("c", "secret-token").build().unwrap();
        let dbg = format!("{:?}", profile);
        assert!(dbg.contains("\"c\""));
        assert!(!dbg.contains("secret-token"));
    }

    #[test]
    fn target_requires_name() {
        let profile = ProfileBuilder::new("c", "tok").build().unwrap();
        for target in [Target::default(), Target::named("")] {
            assert!(matches!(
                target.resolve(&profile).unwrap_err(),
                Error::MissingRequiredOption { option: "name" }
            ));
        }
        assert_eq!(Target::named("n").resolve(&profile).unwrap(), ("c", "n"));
        assert_eq!(
            Target::named("n").container("o").resolve(&profile).unwrap(),
            ("o", "n")
        );
    }

    #[test]
    fn target_rejects_dot_segments() {
        let profile = ProfileBuilder::new("c", "tok").build().unwrap();
        for target in [
            Target::named(".."),
            Target::named("."),
            Target::named("n").container(".."),
        ] {
            assert!(matches!(
                target.resolve(&profile).unwrap_err(),
                Error::Validation(_)
            ));
        }
        assert!(Target::named("..n").resolve(&profile).is_ok());
    }

    #[tokio::test]
    async fn create_token_posts_claims() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/api/tokens/issue"),
                request::headers(contains(("authorization", "Bearer admin-token"))),
                request::body(json_decoded(eq(json!({
                    "ten": "test-container",
                    "dd": 0,
                    "dr": 1,
                    "jtn": "hello",
                    "code": "module.exports = cb => cb(null, 1);",
                    "pb": 0,
                })))),
            ])
            .respond_with(
                status_code(200)
                    .insert_header("location", "https://wt.example.com/api/run/test-container/hello")
                    .body("new.issued.token"),
            ),
        );

        let profile = profile_for(&server);
        let options = CreateOptions::new()
            .name("hello")
            .source("module.exports = cb => cb(null, 1);")
            .parse_body(ParseBody::Never);
        let issued = profile.create_token_with_url(&options).await?;
        assert_eq!(issued.token, "new.issued.token");
        assert_eq!(
            issued.webtask_url.as_deref(),
            Some("https://wt.example.com/api/run/test-container/hello")
        );
        Ok(())
    }

    #[tokio::test]
    async fn create_token_rejects_window_before_request() -> anyhow::Result<()> {
        // no expectations: any request fails the test
        let server = Server::run();
        let profile = profile_for(&server);
        let err = profile
            .create_token(&CreateOptions::new().not_before(100).expires(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidScheduleWindow));
        Ok(())
    }

    #[tokio::test]
    async fn create_token_server_error() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/api/tokens/issue")).respond_with(
                status_code(403)
                    .insert_header("content-type", "application/json")
                    .body(r#"{"message": "insufficient permissions"}"#),
            ),
        );

        let profile = profile_for(&server);
        let err = profile
            .create_token(&CreateOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: insufficient permissions");
        Ok(())
    }

    #[tokio::test]
    async fn inspect_token_flags() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/tokens/inspect"),
                request::query(url_decoded(contains(("token", "some.webtask.token")))),
                request::query(url_decoded(contains(("decrypt", "true")))),
                request::query(url_decoded(not(contains(key("fetch_code"))))),
                request::query(url_decoded(contains(("meta", "true")))),
            ])
            .respond_with(json_encoded(json!({
                "ten": "test-container",
                "jtn": "hello",
                "ectx": {"KEY": "value"},
                "jti": "abc",
            }))),
        );

        let profile = profile_for(&server);
        let claims = profile
            .inspect_token(
                "some.webtask.token",
                &InspectOptions {
                    decrypt: true,
                    meta: true,
                    ..InspectOptions::default()
                },
            )
            .await?;
        assert_eq!(claims.jtn.as_deref(), Some("hello"));
        assert_eq!(claims.ectx, Some(json!({"KEY": "value"})));
        assert_eq!(claims.extra.get("jti"), Some(&json!("abc")));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_token() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/api/tokens/revoke"),
                request::query(url_decoded(contains(("token", "a.b.c")))),
            ])
            .respond_with(status_code(200)),
        );

        let profile = profile_for(&server);
        profile.revoke_token("a.b.c").await?;
        Ok(())
    }

    #[test]
    fn list_query() {
        let mut options = ListOptions {
            offset: Some(0),
            limit: Some(20),
            ..ListOptions::default()
        };
        options.meta.insert("a".into(), "b".into());
        assert_eq!(
            options.query(),
            vec![
                ("offset".to_owned(), "0".to_owned()),
                ("limit".to_owned(), "20".to_owned()),
                ("meta".to_owned(), "a:b".to_owned()),
            ]
        );
    }
}
