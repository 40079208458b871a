/*!
# Webtask Client for Rust

This crate is a client for webtask clusters.  A webtask is a piece of code (or the URL of a
piece of code) wrapped in a signed token; the cluster runs the code when the token is invoked
over HTTP.  The client issues such tokens, invokes them, and manages the resources a container
can hold: named webtasks, cron jobs, webtask storage, log streams and node modules.

# Usage

## Setup

Every operation is a method on a [`Profile`](crate::Profile), built with a
[`ProfileBuilder`](crate::ProfileBuilder).  A profile names a cluster, a container on it, and
the token used to manage that container.  A profile can also be read from the environment
([`ProfileBuilder::from_env`]) or from a `.webtask` profile file
([`ProfileBuilder::from_profile`]).

```
# use httptest::{matchers::*, responders::*, Expectation, Server};
# use tokio;
# use anyhow::Result;
# #[tokio::main]
# async fn main() -> Result<()> {
# let server = Server::run();
# let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.eyJ0ZW4iOiJ3dC0xMjM0LTAiLCJqdG4iOiJoZWxsbyJ9.c2ln";
# server.expect(
#    Expectation::matching(request::method_path("POST", "/api/tokens/issue"))
#   .respond_with(status_code(200).body(token))
# );
# server.expect(
#    Expectation::matching(request::method_path("GET", "/api/run/wt-1234-0/hello"))
#   .respond_with(status_code(200).body("hello, world"))
# );
# let cluster_url = format!("http://{}", server.addr());
use webtask::{CreateOptions, ProfileBuilder, RunOptions};
let profile = ProfileBuilder::new("wt-1234-0", "my-token")
    .url(cluster_url)
    .build()?;
let webtask = profile
    .create(
        &CreateOptions::new()
            .name("hello")
            .code("module.exports = cb => cb(null, 'hello, world');"),
    )
    .await?;
let resp = webtask.run(RunOptions::new()).await?;
assert_eq!(resp.text(), "hello, world");
# Ok(())
# }
```

## Tokens and Claims

[`CreateOptions`] describe a webtask in friendly terms; [`to_claims`] converts them to the
short-named JWT claims the cluster signs.  [`decode_token`] and [`from_claims`] go the other
way, without verifying the token's signature.  A `ten` claim holding a `/regex/` is resolved
to the simplest container name it matches.

## Handles

Operations that produce a webtask return a [`Webtask`] handle, which derives its invocation
URL from its claims and can run, update, schedule or remove itself.  Cron jobs are
represented by [`CronJob`] handles.  Handles hold a clone of the profile that created them.

## Errors

All operations return [`Result`], whose error type [`Error`] distinguishes invalid options
(detected before any request is made) from transport failures and HTTP error responses.
Invoking a webtask with [`Webtask::run`] is the exception: the webtask's HTTP status,
whatever it is, is returned as part of the [`InvocationResponse`].

## Logging

Pass a [`slog::Logger`] to [`ProfileBuilder::logger`] to log each request at debug level.
*/

mod b64;
mod claims;
mod client;
mod config;
mod container_name;
mod cron;
mod error;
mod logs;
mod modules;
mod profile;
mod storage;
mod update;
mod util;
mod webtask;

#[cfg(test)]
mod test_helpers;

pub use reqwest::StatusCode;

pub use claims::{
    decode_token, from_claims, to_claims, Claims, CodeSource, CreateOptions, ParseBody,
    RateLimits, StringMap, TenantClaim, TimeUnit, TokenContainer,
};
pub use config::{default_config_path, load_profiles, ProfileConfig, CONFIG_FILE_NAME};
pub use container_name::{derive as derive_container_name, DeriveError};
pub use cron::{CronJob, CronJobInfo, CronJobOptions, CronJobResult, HistoryOptions};
pub use error::{Error, Result};
pub use logs::{LogEvent, LogStream, LogStreamOptions};
pub use modules::{NodeModule, NodeModuleState};
pub use profile::{
    InspectOptions, IssuedToken, ListOptions, Profile, ProfileBuilder, Target, DEFAULT_URL,
};
pub use storage::Storage;
pub use update::{Update, UpdateOptions};
pub use webtask::{CronJobSpec, InvocationResponse, RunOptions, Webtask};
