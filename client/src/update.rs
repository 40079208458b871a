use crate::claims::{Claims, ParseBody, StringMap};
use crate::error::{Error, Result};
use crate::profile::{InspectOptions, Profile, Target};
use crate::webtask::Webtask;
use serde_json::Value;
use slog::debug;

/// A change to one property of an existing webtask.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Update<T> {
    /// Keep the current value
    #[default]
    Preserve,
    /// Remove the current value
    Clear,
    /// Replace the current value
    Set(T),
}

impl<T> Update<T> {
    fn is_clear(&self) -> bool {
        matches!(self, Update::Clear)
    }

    /// Resolve against the current value
    fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Update::Preserve => current,
            Update::Clear => None,
            Update::Set(value) => Some(value),
        }
    }

    fn map_set<U, F: FnOnce(T) -> U>(self, f: F) -> Update<U> {
        match self {
            Update::Preserve => Update::Preserve,
            Update::Clear => Update::Clear,
            Update::Set(value) => Update::Set(f(value)),
        }
    }
}

/// Options for [`Profile::update_webtask`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Name of the webtask to update; required
    pub name: Option<String>,
    pub container: Option<String>,
    /// New inline code; replaces any code URL
    pub code: Option<String>,
    /// New code URL; replaces any inline code
    pub url: Option<String>,
    pub host: Update<String>,
    pub secrets: Update<StringMap>,
    pub params: Update<StringMap>,
    pub meta: Update<StringMap>,
    pub parse_body: Option<ParseBody>,
    pub merge_body: Option<bool>,
    /// Use the invocation URL returned by the cluster.  Defaults to true.
    pub include_webtask_url: Option<bool>,
}

impl UpdateOptions {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn host(mut self, host: Update<String>) -> Self {
        self.host = host;
        self
    }

    pub fn secrets(mut self, secrets: Update<StringMap>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn params(mut self, params: Update<StringMap>) -> Self {
        self.params = params;
        self
    }

    pub fn meta(mut self, meta: Update<StringMap>) -> Self {
        self.meta = meta;
        self
    }
}

fn to_object(map: StringMap) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

/// Compute the claims for an updated webtask from its inspected claims.
fn updated_claims(current: Claims, options: UpdateOptions) -> Claims {
    let mut claims = current.preserved_for_update();

    claims.host = options.host.apply(current.host).filter(|h| !h.is_empty());
    claims.pb = options.parse_body.map(ParseBody::as_claim).or(current.pb);
    claims.mb = options.merge_body.map(u8::from).or(current.mb);
    claims.ectx = options.secrets.map_set(to_object).apply(current.ectx);
    claims.pctx = options.params.map_set(to_object).apply(current.pctx);
    claims.meta = options.meta.apply(current.meta);

    match (options.code, options.url) {
        (Some(code), _) => claims.code = Some(code),
        (None, Some(url)) => claims.url = Some(url),
        // an inspection with fetch_code returns both the URL and the code fetched from
        // it; keep the URL so that the webtask continues to track it
        (None, None) => match current.url {
            Some(url) => claims.url = Some(url),
            None => claims.code = current.code,
        },
    }

    claims
}

impl Profile {
    /// Update a named webtask's code, secrets or other claims.
    ///
    /// This reads the current claims, applies the changes and issues a new token under
    /// the same name.  Another agent updating the webtask in the meantime will have its
    /// change overwritten.
    pub async fn update_webtask(&self, options: UpdateOptions) -> Result<Webtask> {
        if options.name.as_deref().map_or(true, str::is_empty) {
            return Err(Error::MissingRequiredOption { option: "name" });
        }
        if options.code.is_some() && options.url.is_some() {
            return Err(Error::Validation(
                "Either the `code` or `url` option can be specified, but not both".to_owned(),
            ));
        }

        let target = Target {
            name: options.name.clone(),
            container: options.container.clone(),
        };
        let webtask = self.get_webtask(&target).await?;
        let current = webtask
            .inspect(&InspectOptions {
                decrypt: !options.secrets.is_clear(),
                fetch_code: true,
                meta: !options.meta.is_clear(),
            })
            .await?;

        debug!(self.logger(), "updating webtask"; "name" => webtask.name().unwrap_or_default());

        let include_webtask_url = options.include_webtask_url.unwrap_or(true);
        let claims = updated_claims(current, options);
        self.create_raw(&claims, include_webtask_url).await
    }
}
