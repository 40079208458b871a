use crate::claims::{decode_token, Claims, StringMap};
use crate::client::{read_json, read_optional_json};
use crate::error::{Error, Result};
use crate::profile::{InspectOptions, ListOptions, Profile, Target};
use crate::util::api_path;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use slog::debug;
use std::collections::BTreeMap;

/// Headers of a job result with this prefix carry JSON-encoded values.
const AUTH0_HEADER_PREFIX: &str = "x-auth0";

/// A scheduled job as described by the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJobInfo {
    #[serde(default)]
    pub container: String,
    pub name: String,
    pub token: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub meta: StringMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_scheduled_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<Value>,
    /// Any other properties of the job
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The outcome of one execution of a scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJobResult {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub result_type: Option<String>,
    #[serde(rename = "statusCode", default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Response headers; those prefixed `x-auth0` are decoded from JSON where possible
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CronJobResult {
    fn decode_auth0_headers(mut self) -> Self {
        for (name, value) in self.headers.iter_mut() {
            if !name.starts_with(AUTH0_HEADER_PREFIX) {
                continue;
            }
            if let Value::String(ref s) = value {
                if let Ok(decoded) = serde_json::from_str(s) {
                    *value = decoded;
                }
            }
        }
        self
    }
}

/// Accept RFC 3339 strings or epoch milliseconds; anything else is treated as absent.
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    })
}

/// Options for [`Profile::create_cron_job`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronJobOptions {
    pub container: Option<String>,
    pub name: String,
    /// Token of the webtask to run
    pub token: String,
    pub schedule: String,
    pub state: Option<String>,
    pub meta: Option<StringMap>,
    /// IANA timezone of the schedule
    pub tz: Option<String>,
}

/// Paging for a job's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryOptions {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            offset: Some(0),
            limit: Some(10),
        }
    }
}

/// A CronJob is a handle on a scheduled job.
#[derive(Debug, Clone)]
pub struct CronJob {
    profile: Profile,
    info: CronJobInfo,
    claims: Claims,
}

impl CronJob {
    pub(crate) fn new(profile: &Profile, mut info: CronJobInfo, container: &str) -> Result<Self> {
        if info.container.is_empty() {
            info.container = container.to_owned();
        }
        let claims = decode_token(&info.token)?;
        Ok(CronJob {
            profile: profile.clone(),
            info,
            claims,
        })
    }

    pub fn info(&self) -> &CronJobInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn container(&self) -> &str {
        &self.info.container
    }

    pub fn schedule(&self) -> &str {
        &self.info.schedule
    }

    pub fn state(&self) -> Option<&str> {
        self.info.state.as_deref()
    }

    /// The claims of the job's webtask token
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// The URL of the webtask this job runs
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.profile.url(),
            api_path(&["api", "run", self.container(), self.name()])
        )
    }

    fn target(&self) -> Target {
        Target::named(self.name()).container(self.container())
    }

    /// Re-read this job from the cluster, updating it in place.
    pub async fn refresh(&mut self) -> Result<&mut Self> {
        let fresh = self.profile.get_cron_job(&self.target()).await?;
        self.info = fresh.info;
        self.claims = fresh.claims;
        Ok(self)
    }

    /// Unschedule this job.  The webtask token is not revoked.
    pub async fn remove(&self) -> Result<()> {
        self.profile.remove_cron_job(&self.target()).await
    }

    pub async fn get_history(&self, options: HistoryOptions) -> Result<Vec<CronJobResult>> {
        self.profile
            .get_cron_job_history(&self.target(), options)
            .await
    }

    /// Change the state of this job (`active` or `inactive`), updating it in place.
    pub async fn set_job_state(&mut self, state: &str) -> Result<&mut Self> {
        let changes = self
            .profile
            .set_cron_job_state(&self.target(), state)
            .await?;
        self.merge(changes)?;
        Ok(self)
    }

    /// Inspect the job's webtask token.
    pub async fn inspect(&self, options: &InspectOptions) -> Result<Claims> {
        self.profile.inspect_token(&self.info.token, options).await
    }

    /// Overlay the properties of a response onto this job.
    fn merge(&mut self, changes: Value) -> Result<()> {
        let changes = match changes {
            Value::Object(changes) => changes,
            _ => return Ok(()),
        };

        let mut current: Map<String, Value> = match serde_json::to_value(&self.info) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        current.extend(changes);

        let info: CronJobInfo = serde_json::from_value(Value::Object(current))
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        if info.token != self.info.token {
            self.claims = decode_token(&info.token)?;
        }
        self.info = info;
        Ok(())
    }
}

impl Profile {
    /// Schedule a webtask token as a cron job.
    pub async fn create_cron_job(&self, options: CronJobOptions) -> Result<CronJob> {
        if options.name.is_empty() {
            return Err(Error::MissingRequiredOption { option: "name" });
        }
        let container = options.container.as_deref().unwrap_or(self.container());

        let mut payload = json!({
            "token": options.token,
            "schedule": options.schedule,
        });
        if let Some(state) = options.state {
            payload["state"] = json!(state);
        }
        if let Some(meta) = options.meta {
            payload["meta"] = json!(meta);
        }
        if let Some(tz) = options.tz {
            payload["tz"] = json!(tz);
        }

        let info: CronJobInfo = self
            .client()
            .request_json(
                "PUT",
                &api_path(&["api", "cron", container, &options.name]),
                vec![],
                Some(&payload),
            )
            .await?;
        debug!(self.logger(), "created cron job"; "name" => &info.name);
        CronJob::new(self, info, container)
    }

    /// Remove a cron job.
    pub async fn remove_cron_job(&self, target: &Target) -> Result<()> {
        let (container, name) = target.resolve(self)?;
        self.client()
            .request(
                "DELETE",
                &api_path(&["api", "cron", container, name]),
                vec![],
                None,
            )
            .await?;
        Ok(())
    }

    /// Set the state of a cron job, returning the properties reported by the cluster.
    pub async fn set_cron_job_state(&self, target: &Target, state: &str) -> Result<Value> {
        let (container, name) = target.resolve(self)?;
        let resp = self
            .client()
            .request(
                "PUT",
                &api_path(&["api", "cron", container, name, "state"]),
                vec![],
                Some(&json!({ "state": state })),
            )
            .await?;
        read_optional_json(resp).await
    }

    pub async fn list_cron_jobs(&self, options: &ListOptions) -> Result<Vec<CronJob>> {
        let container = options.container.as_deref().unwrap_or(self.container());
        let jobs: Vec<CronJobInfo> = self
            .client()
            .request_json(
                "GET",
                &api_path(&["api", "cron", container]),
                options.query(),
                None,
            )
            .await?;
        jobs.into_iter()
            .map(|info| CronJob::new(self, info, container))
            .collect()
    }

    pub async fn get_cron_job(&self, target: &Target) -> Result<CronJob> {
        let (container, name) = target.resolve(self)?;
        let info = self
            .client()
            .request_json(
                "GET",
                &api_path(&["api", "cron", container, name]),
                vec![],
                None,
            )
            .await?;
        CronJob::new(self, info, container)
    }

    /// Get the results of past executions of a cron job.
    pub async fn get_cron_job_history(
        &self,
        target: &Target,
        options: HistoryOptions,
    ) -> Result<Vec<CronJobResult>> {
        let (container, name) = target.resolve(self)?;
        let mut query = vec![];
        if let Some(offset) = options.offset {
            query.push(("offset".to_owned(), offset.to_string()));
        }
        if let Some(limit) = options.limit {
            query.push(("limit".to_owned(), limit.to_string()));
        }

        let resp = self
            .client()
            .request(
                "GET",
                &api_path(&["api", "cron", container, name, "history"]),
                query,
                None,
            )
            .await?;
        let results: Vec<CronJobResult> = read_json(resp).await?;
        Ok(results
            .into_iter()
            .map(CronJobResult::decode_auth0_headers)
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::{fake_token, profile_for};
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::Value;

    fn job_json(token: &str, state: &str) -> Value {
        json!({
            "container": "test-container",
            "name": "nightly",
            "token": token,
            "schedule": "0 3 * * *",
            "state": state,
            "meta": {"team": "a"},
            "next_scheduled_at": "2016-08-01T03:00:00.000Z",
            "results": [],
        })
    }

    #[test]
    fn info_parsing() {
        let token = fake_token(&json!({"ten": "test-container", "jtn": "nightly"}));
        let info: CronJobInfo = serde_json::from_value(job_json(&token, "active")).unwrap();
        assert_eq!(info.name, "nightly");
        assert_eq!(info.state.as_deref(), Some("active"));
        assert_eq!(
            info.next_scheduled_at.unwrap().to_rfc3339(),
            "2016-08-01T03:00:00+00:00"
        );
        assert_eq!(info.extra.get("results"), Some(&json!([])));
    }

    #[test]
    fn result_parsing() {
        let result: CronJobResult = serde_json::from_value(json!({
            "scheduled_at": "2016-08-01T03:00:00.000Z",
            "started_at": 1470020400500i64,
            "completed_at": "not a date",
            "type": "success",
            "statusCode": 200,
            "body": "ok",
            "headers": {
                "x-auth0-logs": "[{\"msg\":\"hi\"}]",
                "x-auth0-broken": "{nope",
                "content-type": "[1]",
            },
        }))
        .unwrap();
        let result = result.decode_auth0_headers();

        assert!(result.scheduled_at.is_some());
        assert_eq!(
            result.started_at.unwrap().timestamp_millis(),
            1470020400500
        );
        assert_eq!(result.completed_at, None);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.headers["x-auth0-logs"], json!([{"msg": "hi"}]));
        assert_eq!(result.headers["x-auth0-broken"], json!("{nope"));
        assert_eq!(result.headers["content-type"], json!("[1]"));
    }

    #[tokio::test]
    async fn create_and_url() -> anyhow::Result<()> {
        let server = Server::run();
        let token = fake_token(&json!({"ten": "test-container", "jtn": "nightly"}));
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PUT", "/api/cron/test-container/nightly"),
                request::body(json_decoded(eq(json!({
                    "token": token,
                    "schedule": "0 3 * * *",
                    "state": "active",
                    "tz": "Europe/Paris",
                })))),
            ])
            .respond_with(json_encoded(job_json(&token, "active"))),
        );

        let profile = profile_for(&server);
        let job = profile
            .create_cron_job(CronJobOptions {
                name: "nightly".into(),
                token: token.clone(),
                schedule: "0 3 * * *".into(),
                state: Some("active".into()),
                tz: Some("Europe/Paris".into()),
                ..CronJobOptions::default()
            })
            .await?;
        assert_eq!(job.name(), "nightly");
        assert_eq!(job.claims().jtn.as_deref(), Some("nightly"));
        assert_eq!(
            job.url(),
            format!("http://{}/api/run/test-container/nightly", server.addr())
        );
        Ok(())
    }

    #[tokio::test]
    async fn create_requires_name() {
        let server = Server::run();
        let profile = profile_for(&server);
        assert!(matches!(
            profile
                .create_cron_job(CronJobOptions::default())
                .await
                .unwrap_err(),
            Error::MissingRequiredOption { option: "name" }
        ));
    }

    #[tokio::test]
    async fn dot_names_rejected_before_request() {
        let server = Server::run();
        let profile = profile_for(&server);
        let options = CronJobOptions {
            name: "..".into(),
            token: "tok".into(),
            schedule: "* * * * *".into(),
            ..CronJobOptions::default()
        };
        assert!(matches!(
            profile.create_cron_job(options).await.unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(
            profile.remove_cron_job(&Target::named("..")).await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn set_state_and_refresh_in_place() -> anyhow::Result<()> {
        let server = Server::run();
        let token = fake_token(&json!({"ten": "test-container", "jtn": "nightly"}));
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/cron/test-container/nightly"))
                .times(2)
                .respond_with(json_encoded(job_json(&token, "active"))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PUT", "/api/cron/test-container/nightly/state"),
                request::body(json_decoded(eq(json!({"state": "inactive"})))),
            ])
            .respond_with(json_encoded(json!({"state": "inactive"}))),
        );

        let profile = profile_for(&server);
        let mut job = profile.get_cron_job(&Target::named("nightly")).await?;
        assert_eq!(job.state(), Some("active"));

        job.set_job_state("inactive").await?;
        assert_eq!(job.state(), Some("inactive"));
        assert_eq!(job.schedule(), "0 3 * * *");

        let refreshed = job.refresh().await?;
        assert_eq!(refreshed.state(), Some("active"));
        Ok(())
    }

    #[tokio::test]
    async fn remove_does_not_revoke() -> anyhow::Result<()> {
        let server = Server::run();
        let token = fake_token(&json!({"ten": "test-container", "jtn": "nightly"}));
        server.expect(
            Expectation::matching(request::method_path("DELETE", "/api/cron/test-container/nightly"))
                .times(1)
                .respond_with(status_code(204)),
        );
        server.expect(
            Expectation::matching(request::method_path("POST", "/api/tokens/revoke"))
                .times(0)
                .respond_with(status_code(200)),
        );

        let profile = profile_for(&server);
        let info: CronJobInfo = serde_json::from_value(job_json(&token, "active"))?;
        let job = CronJob::new(&profile, info, "test-container")?;
        job.remove().await?;
        Ok(())
    }

    #[tokio::test]
    async fn list_fills_container() -> anyhow::Result<()> {
        let server = Server::run();
        let token = fake_token(&json!({"ten": "other", "jtn": "nightly"}));
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/cron/other"),
                request::query(url_decoded(contains(("meta", "team:a")))),
            ])
            .respond_with(json_encoded(json!([
                {"name": "nightly", "token": token, "schedule": "0 3 * * *"},
            ]))),
        );

        let profile = profile_for(&server);
        let mut options = ListOptions {
            container: Some("other".into()),
            ..ListOptions::default()
        };
        options.meta.insert("team".into(), "a".into());
        let jobs = profile.list_cron_jobs(&options).await?;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].container(), "other");
        Ok(())
    }

    #[tokio::test]
    async fn history_paging() -> anyhow::Result<()> {
        let server = Server::run();
        let token = fake_token(&json!({"ten": "test-container", "jtn": "nightly"}));
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/cron/test-container/nightly/history"),
                request::query(url_decoded(contains(("offset", "0")))),
                request::query(url_decoded(contains(("limit", "10")))),
            ])
            .respond_with(json_encoded(json!([
                {
                    "scheduled_at": "2016-08-01T03:00:00.000Z",
                    "type": "error",
                    "statusCode": 500,
                    "headers": {"x-auth0-proxy-stats": "{\"ms\": 5}"},
                },
            ]))),
        );

        let profile = profile_for(&server);
        let info: CronJobInfo = serde_json::from_value(job_json(&token, "active"))?;
        let job = CronJob::new(&profile, info, "test-container")?;
        let history = job.get_history(HistoryOptions::default()).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result_type.as_deref(), Some("error"));
        assert_eq!(history[0].headers["x-auth0-proxy-stats"], json!({"ms": 5}));
        Ok(())
    }
}
