//! The token-claims protocol: translation of [`CreateOptions`] into the compact
//! [`Claims`] record the cluster signs, and of issued tokens back into the
//! container they address.
use crate::b64::URL_SAFE_LENIENT;
use crate::container_name;
use crate::error::{Error, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// String-to-string mapping used for secrets, params and metadata.
pub type StringMap = BTreeMap<String, String>;

/// How the webtask runtime should treat request bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseBody {
    Never = 0,
    Always = 1,
    OnArity = 2,
}

impl ParseBody {
    pub fn as_claim(self) -> u8 {
        self as u8
    }
}

impl From<bool> for ParseBody {
    fn from(parse: bool) -> Self {
        if parse {
            ParseBody::Always
        } else {
            ParseBody::Never
        }
    }
}

/// The time units over which rate limits are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 6] = [
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
        TimeUnit::Week,
        TimeUnit::Month,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<TimeUnit> {
        TimeUnit::ALL.into_iter().find(|u| u.keyword() == keyword)
    }
}

/// Rate limits as supplied by a caller: time-unit keyword to a positive integer.  Values
/// are kept loosely typed (numbers or integer strings are accepted) and validated when
/// the claims are built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimits(BTreeMap<String, Value>);

impl RateLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a limit by keyword (`second`, `minute`, ..)
    pub fn set<K: Into<String>, V: Into<Value>>(mut self, keyword: K, value: V) -> Self {
        self.0.insert(keyword.into(), value.into());
        self
    }

    /// Set a limit for the given unit
    pub fn per(self, unit: TimeUnit, value: u64) -> Self {
        self.set(unit.keyword(), value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validated(&self) -> Result<Vec<(TimeUnit, u64)>> {
        let mut limits = Vec::with_capacity(self.0.len());
        for (keyword, value) in &self.0 {
            let unit = TimeUnit::from_keyword(keyword).ok_or_else(|| {
                Error::UnsupportedLimitType {
                    limit: keyword.clone(),
                    supported: TimeUnit::ALL.iter().map(|u| u.keyword()).collect(),
                }
            })?;
            let value = positive_integer(value).ok_or_else(|| Error::UnsupportedLimitValue {
                limit: keyword.clone(),
            })?;
            limits.push((unit, value));
        }
        Ok(limits)
    }
}

impl From<BTreeMap<String, Value>> for RateLimits {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

fn whole_number(f: f64) -> Option<u64> {
    if f.is_finite() && f.fract() == 0.0 && f >= 1.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

fn positive_integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(whole_number)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_number))
        }
        _ => None,
    }
    .filter(|v| *v >= 1)
}

/// The `ten` claim, which is either a single (possibly regex) tenant or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TenantClaim {
    Name(String),
    Names(Vec<Value>),
}

/// Claims of a webtask token, with the short keys used on the wire.
///
/// `ectx` and `pctx` are kept as JSON values: an issued token carries `ectx` as an
/// encrypted string, while a decrypted inspection returns a mapping.  Claims not named
/// here are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ten: Option<TenantClaim>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dd: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ectx: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pctx: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<StringMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mb: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pb: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dr: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jtn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    // container limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ls: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lm: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lh: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ld: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lw: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lo: Option<u64>,

    // token limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltm: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lth: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltd: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltw: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lto: Option<u64>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Claims {
    fn container_limit_mut(&mut self, unit: TimeUnit) -> &mut Option<u64> {
        match unit {
            TimeUnit::Second => &mut self.ls,
            TimeUnit::Minute => &mut self.lm,
            TimeUnit::Hour => &mut self.lh,
            TimeUnit::Day => &mut self.ld,
            TimeUnit::Week => &mut self.lw,
            TimeUnit::Month => &mut self.lo,
        }
    }

    fn token_limit_mut(&mut self, unit: TimeUnit) -> &mut Option<u64> {
        match unit {
            TimeUnit::Second => &mut self.lts,
            TimeUnit::Minute => &mut self.ltm,
            TimeUnit::Hour => &mut self.lth,
            TimeUnit::Day => &mut self.ltd,
            TimeUnit::Week => &mut self.ltw,
            TimeUnit::Month => &mut self.lto,
        }
    }

    /// A copy containing only the claims that survive an update verbatim: tenant, name,
    /// validity window, issuance depth, self-revocation and all rate limits.
    pub(crate) fn preserved_for_update(&self) -> Claims {
        Claims {
            ten: self.ten.clone(),
            jtn: self.jtn.clone(),
            nbf: self.nbf,
            exp: self.exp,
            dd: self.dd,
            dr: self.dr,
            ls: self.ls,
            lm: self.lm,
            lh: self.lh,
            ld: self.ld,
            lw: self.lw,
            lo: self.lo,
            lts: self.lts,
            ltm: self.ltm,
            lth: self.lth,
            ltd: self.ltd,
            ltw: self.ltw,
            lto: self.lto,
            ..Claims::default()
        }
    }
}

/// Where a webtask's code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeSource {
    Code(String),
    Url(String),
}

impl CodeSource {
    /// Strings beginning with `http://` or `https://` (in any case) are code URLs;
    /// anything else is inline code.
    pub fn classify<S: Into<String>>(code_or_url: S) -> CodeSource {
        let s = code_or_url.into();
        let lower = s.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            CodeSource::Url(s)
        } else {
            CodeSource::Code(s)
        }
    }
}

/// Options for creating a webtask token.  Fields are public; the builder-style methods
/// are a convenience.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Container for the token; defaults to the profile's container
    pub container: Option<String>,
    /// Name of the webtask (`jtn`)
    pub name: Option<String>,
    pub code: Option<String>,
    pub code_url: Option<String>,
    /// Secrets, encrypted into the token; omitted when empty
    pub secrets: StringMap,
    /// Plaintext parameters; omitted when empty
    pub params: StringMap,
    pub meta: StringMap,
    /// Custom invocation host
    pub host: Option<String>,
    /// Not-before, in epoch seconds
    pub nbf: Option<i64>,
    /// Expiration, in epoch seconds
    pub exp: Option<i64>,
    pub merge_body: bool,
    pub parse_body: Option<ParseBody>,
    /// Allow the token to revoke itself.  When false (the default) the `dr` claim is set.
    pub self_revoke: bool,
    pub issuance_depth: u32,
    pub token_limit: RateLimits,
    pub container_limit: RateLimits,
    /// Use the invocation URL returned by the cluster when creating a
    /// [`Webtask`](crate::Webtask).  Defaults to true.
    pub include_webtask_url: Option<bool>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the code or code URL, classified with [`CodeSource::classify`]
    pub fn source<S: Into<String>>(self, code_or_url: S) -> Self {
        match CodeSource::classify(code_or_url) {
            CodeSource::Code(code) => self.code(code),
            CodeSource::Url(url) => self.code_url(url),
        }
    }

    pub fn code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self.code_url = None;
        self
    }

    pub fn code_url<S: Into<String>>(mut self, url: S) -> Self {
        self.code_url = Some(url.into());
        self.code = None;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn container<S: Into<String>>(mut self, container: S) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn secret<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }

    pub fn param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn meta<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn not_before(mut self, nbf: i64) -> Self {
        self.nbf = Some(nbf);
        self
    }

    pub fn expires(mut self, exp: i64) -> Self {
        self.exp = Some(exp);
        self
    }

    pub fn merge_body(mut self, merge: bool) -> Self {
        self.merge_body = merge;
        self
    }

    pub fn parse_body<P: Into<ParseBody>>(mut self, parse: P) -> Self {
        self.parse_body = Some(parse.into());
        self
    }

    pub fn self_revoke(mut self, self_revoke: bool) -> Self {
        self.self_revoke = self_revoke;
        self
    }

    pub fn issuance_depth(mut self, depth: u32) -> Self {
        self.issuance_depth = depth;
        self
    }

    pub fn token_limit<K: Into<String>, V: Into<Value>>(mut self, keyword: K, value: V) -> Self {
        self.token_limit = self.token_limit.set(keyword, value);
        self
    }

    pub fn container_limit<K: Into<String>, V: Into<Value>>(
        mut self,
        keyword: K,
        value: V,
    ) -> Self {
        self.container_limit = self.container_limit.set(keyword, value);
        self
    }

    pub fn include_webtask_url(mut self, include: bool) -> Self {
        self.include_webtask_url = Some(include);
        self
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

fn non_empty(map: &StringMap) -> Option<StringMap> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

fn to_object(map: &StringMap) -> Option<Value> {
    non_empty(map).map(|m| {
        Value::Object(
            m.into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        )
    })
}

/// Build the claims to be signed for the given options.  This performs all caller-input
/// validation, and never touches the network.
pub fn to_claims(options: &CreateOptions, default_container: &str) -> Result<Claims> {
    if let (Some(exp), Some(nbf)) = (options.exp, options.nbf) {
        if exp <= nbf {
            return Err(Error::InvalidScheduleWindow);
        }
    }

    let code = non_blank(&options.code);
    let code_url = non_blank(&options.code_url);
    if code.is_some() && code_url.is_some() {
        return Err(Error::Validation(
            "Either `code` or `code_url` can be specified, but not both".to_owned(),
        ));
    }

    let container =
        non_blank(&options.container).unwrap_or_else(|| default_container.to_owned());

    let mut claims = Claims {
        ten: Some(TenantClaim::Name(container)),
        dd: Some(options.issuance_depth),
        url: code_url,
        code,
        ectx: to_object(&options.secrets),
        pctx: to_object(&options.params),
        meta: non_empty(&options.meta),
        nbf: options.nbf,
        exp: options.exp,
        mb: if options.merge_body { Some(1) } else { None },
        pb: options.parse_body.map(ParseBody::as_claim),
        dr: if options.self_revoke { None } else { Some(1) },
        jtn: non_blank(&options.name),
        host: non_blank(&options.host),
        ..Claims::default()
    };

    for (unit, value) in options.token_limit.validated()? {
        *claims.token_limit_mut(unit) = Some(value);
    }
    for (unit, value) in options.container_limit.validated()? {
        *claims.container_limit_mut(unit) = Some(value);
    }

    Ok(claims)
}

/// Decode the payload of a token without verifying its signature.
pub fn decode_token(token: &str) -> Result<Claims> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::InvalidToken("token is not a JWT".to_owned()))?;
    let bytes = URL_SAFE_LENIENT
        .decode(payload)
        .map_err(|e| Error::InvalidToken(format!("unable to decode token payload: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidToken(format!("unable to parse token claims: {}", e)))
}

/// A token together with the container it addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContainer {
    pub container: String,
    pub token: String,
}

/// Resolve the container addressed by a token, following the `ten` claim rules: a list
/// yields its first element, and a `/regex/` yields the lowest string it matches.
pub fn from_claims(token: &str) -> Result<TokenContainer> {
    let claims = decode_token(token)?;
    let container = resolve_container(claims.ten.as_ref())?;
    Ok(TokenContainer {
        container,
        token: token.to_owned(),
    })
}

pub(crate) fn resolve_container(ten: Option<&TenantClaim>) -> Result<String> {
    let container = match ten {
        None => return Err(Error::InvalidToken("missing `ten` claim".to_owned())),
        Some(TenantClaim::Names(names)) => match names.first() {
            Some(Value::String(s)) => s.clone(),
            other => {
                return Err(Error::InvalidToken(format!(
                    "expecting `ten` claim to be a non-blank string, got `{}`",
                    other.cloned().unwrap_or(Value::Null)
                )))
            }
        },
        Some(TenantClaim::Name(name)) => match container_name::pattern_of(name) {
            Some(pattern) => {
                container_name::derive(pattern).map_err(|source| Error::ContainerDerivation {
                    claim: name.clone(),
                    source,
                })?
            }
            None => name.clone(),
        },
    };

    if container.is_empty() {
        return Err(Error::InvalidToken(
            "expecting `ten` claim to be a non-blank string".to_owned(),
        ));
    }
    Ok(container)
}
