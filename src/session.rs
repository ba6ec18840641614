use std::sync::OnceLock;

use anyhow::Context;
use regex::Regex;

const SESSION_ID_PATTERN: &str = r"sessionid=(\w+);";

/// Pulls the `sessionid` value out of a browser cookie string. The portal
/// expects it echoed back as a form field on every write.
pub fn session_id(cookie: &str) -> anyhow::Result<String> {
    static SESSION_ID_REGEX: OnceLock<Regex> = OnceLock::new();

    #[allow(clippy::expect_used)]
    let regex = SESSION_ID_REGEX
        .get_or_init(|| Regex::new(SESSION_ID_PATTERN).expect("session id regex is not available"));

    let session_id = regex
        .captures(cookie)
        .and_then(|captures| captures.get(1))
        .context("sessionid not found in cookie")?;

    Ok(session_id.as_str().to_string())
}
