use crate::b64::URL_SAFE_LENIENT;
use crate::profile::{Profile, ProfileBuilder};
use base64::Engine;
use httptest::Server;
use serde_json::Value;
use slog::{o, Drain, Logger};

pub(crate) fn test_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();

    Logger::root(drain, o!())
}

/// Build an unsigned JWT carrying the given claims.  The signature segment is junk, which
/// is fine as the client never verifies signatures.
pub(crate) fn fake_token(claims: &Value) -> String {
    let header = URL_SAFE_LENIENT.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_LENIENT.encode(claims.to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}

/// A profile for `test-container`, pointed at the given server.
pub(crate) fn profile_for(server: &Server) -> Profile {
    ProfileBuilder::new("test-container", "admin-token")
        .url(format!("http://{}", server.addr()))
        .logger(test_logger())
        .build()
        .unwrap()
}
