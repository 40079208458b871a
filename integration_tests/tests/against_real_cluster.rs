use anyhow::Result;
use std::env;
use webtask::{CreateOptions, Profile, ProfileBuilder, RunOptions, StatusCode, Target};

/// Return a profile built from the SANDBOX_* environment variables, or None if the test should
/// be skipped, or panic if NO_TEST_SKIP is set and the env vars are not.
fn get_profile() -> Option<Profile> {
    if env::var("SANDBOX_CONTAINER").is_ok() && env::var("SANDBOX_TOKEN").is_ok() {
        Some(
            ProfileBuilder::from_env()
                .expect("reading profile from environment")
                .build()
                .expect("building profile"),
        )
    } else {
        match env::var("NO_TEST_SKIP") {
            Ok(_) => panic!("NO_TEST_SKIP is set but SANDBOX_{{CONTAINER,TOKEN}} are not!"),
            Err(_) => None,
        }
    }
}

/// Create an unnamed webtask and run it
#[tokio::test]
async fn test_run_unnamed() -> Result<()> {
    if let Some(profile) = get_profile() {
        let resp = profile
            .run(
                "module.exports = cb => cb(null, 'hello, world');",
                CreateOptions::new(),
                RunOptions::new(),
            )
            .await?;
        assert_eq!(resp.status_code, StatusCode::OK);
        assert_eq!(resp.json::<String>()?, "hello, world");
    }
    Ok(())
}

/// Create a named webtask, read it back, and remove it
#[tokio::test]
async fn test_named_lifecycle() -> Result<()> {
    if let Some(profile) = get_profile() {
        let name = "client-rs-integration-test";
        let created = profile
            .create(
                &CreateOptions::new()
                    .name(name)
                    .code("module.exports = cb => cb(null, 42);"),
            )
            .await?;
        assert_eq!(created.name(), Some(name));

        let fetched = profile.get_webtask(&Target::named(name)).await?;
        assert_eq!(fetched.name(), Some(name));

        assert!(fetched.remove().await?);
    }
    Ok(())
}

/// Test that a 404 is treated as an error
#[tokio::test]
async fn test_no_such_webtask() -> Result<()> {
    if let Some(profile) = get_profile() {
        let res = profile
            .get_webtask(&Target::named("no-such-webtask-exists"))
            .await;
        assert_eq!(
            res.err().and_then(|e| e.status_code()),
            Some(StatusCode::NOT_FOUND)
        );
    }
    Ok(())
}
