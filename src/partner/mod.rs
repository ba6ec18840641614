mod interfaces;
pub mod locale;

use std::{path::Path, str::FromStr, time::Duration};

use anyhow::Context;
use reqwest::{header::COOKIE, multipart};
use serde::de::DeserializeOwned;

use crate::partner::interfaces::{FetchAchievementsResponse, NewAchievementResponse};

pub use self::interfaces::{
    form_value, AchievementDefinition, AchievementFile, AchievementSlot, AppList,
    RemoteAchievement, SteamApp,
};

pub const DEFAULT_API_URL: &str = "https://partner.steamgames.com";
const MAX_IMAGE_FILE_SIZE: &str = "3000000";

/// Which of the two icons of an achievement an upload replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconKind {
    Unlocked,
    Locked,
}

impl IconKind {
    const fn request_type(self) -> &'static str {
        match self {
            Self::Unlocked => "achievement",
            Self::Locked => "achievement_gray",
        }
    }
}

pub struct Sdk {
    api_url: String,
    max_retries: usize,
    retry_delay: Duration,
    client: reqwest::Client,
    cookie: String,
    session_id: String,
}

impl Sdk {
    /// Fails before any request is made when the cookie carries no session id.
    pub fn new(
        api_url: &str,
        user_agent: &str,
        cookie: &str,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let cookie = cookie.trim().to_string();
        let session_id = crate::session::session_id(&cookie)?;

        let mut builder = reqwest::Client::builder().user_agent(user_agent);

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .context("Failed to create partner API client")?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            client,
            cookie,
            session_id,
            max_retries: 0,
            retry_delay: Duration::from_secs(3),
        })
    }

    pub fn set_max_retries(&mut self, max_retries: usize) {
        self.max_retries = max_retries;
    }

    #[cfg(test)]
    pub(crate) fn set_retry_delay(&mut self, retry_delay: Duration) {
        self.retry_delay = retry_delay;
    }

    pub async fn fetch_achievements(&self, app_id: &str) -> anyhow::Result<Vec<RemoteAchievement>> {
        let url = format!("{}/apps/fetchachievements/{app_id}", self.api_url);

        let json = self.send(self.client.get(url)).await?;
        let response: FetchAchievementsResponse = parse_response(json, "fetch achievements")?;

        Ok(response.achievements)
    }

    /// Asks the portal for a fresh slot. The returned slot is authoritative;
    /// `hint` only tells the portal where the caller expects it. Never
    /// retried: a create the portal committed before failing would take a
    /// second slot.
    pub async fn new_achievement(
        &self,
        app_id: &str,
        hint: AchievementSlot,
    ) -> anyhow::Result<AchievementSlot> {
        let url = format!("{}/apps/newachievement/{app_id}", self.api_url);
        let form = [
            ("sessionid", self.session_id.clone()),
            ("maxstatid", hint.stat_id.to_string()),
            ("maxbitid", hint.bit_id.to_string()),
        ];

        let json = self
            .send_with_retries(self.client.post(url).form(&form), 0)
            .await?;
        let response: NewAchievementResponse = parse_response(json, "new achievement")?;

        Ok(response.achievement)
    }

    pub async fn delete_achievement(
        &self,
        app_id: &str,
        slot: AchievementSlot,
    ) -> anyhow::Result<serde_json::Value> {
        let url = format!(
            "{}/apps/deleteachievement/{app_id}/{}/{}",
            self.api_url, slot.stat_id, slot.bit_id
        );
        let form = [("sessionid", self.session_id.clone())];

        self.send(self.client.post(url).form(&form)).await
    }

    pub async fn save_achievement(
        &self,
        app_id: &str,
        slot: AchievementSlot,
        definition: &AchievementDefinition,
    ) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/apps/saveachievement/{app_id}", self.api_url);
        let form = save_form(&self.session_id, slot, definition)
            .with_context(|| format!("Failed to build save request for {}", definition.id))?;

        self.send(self.client.post(url).form(&form)).await
    }

    /// Uploads one icon. The file is streamed from disk and closed once the
    /// request finishes, whether or not it succeeds.
    pub async fn upload_image(
        &self,
        app_id: &str,
        slot: AchievementSlot,
        kind: IconKind,
        path: &Path,
    ) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/images/uploadachievement", self.api_url);

        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open image: {}", path.display()))?;
        let length = file
            .metadata()
            .await
            .with_context(|| format!("Failed to read image metadata: {}", path.display()))?
            .len();
        let file_name = path
            .file_name()
            .map_or_else(|| "image".to_string(), |name| name.to_string_lossy().to_string());

        let image = multipart::Part::stream_with_length(file, length).file_name(file_name);
        let form = multipart::Form::new()
            .text("sessionid", self.session_id.clone())
            .text("MAX_FILE_SIZE", MAX_IMAGE_FILE_SIZE)
            .text("appID", app_id.to_string())
            .text("statID", slot.stat_id.to_string())
            .text("bit", slot.bit_id.to_string())
            .text("requestType", kind.request_type())
            .part("image", image);

        self.send(self.client.post(url).multipart(form)).await
    }

    /// Digest of an image served by the portal, fetched with the session
    /// cookie.
    pub async fn image_digest(&self, url: &str) -> anyhow::Result<String> {
        let request = self
            .client
            .get(url)
            .header(COOKIE, &self.cookie)
            .build()
            .context("Failed to build image request")?;

        let response = retry_request(&self.client, request, self.max_retries, self.retry_delay)
            .await
            .with_context(|| format!("Failed to fetch image: {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch image: {url}: {}", response.status());
        }

        crate::digest::response_digest(response).await
    }

    async fn send(&self, request_builder: reqwest::RequestBuilder) -> anyhow::Result<serde_json::Value> {
        self.send_with_retries(request_builder, self.max_retries).await
    }

    async fn send_with_retries(
        &self,
        request_builder: reqwest::RequestBuilder,
        max_retries: usize,
    ) -> anyhow::Result<serde_json::Value> {
        let request = request_builder
            .header(COOKIE, &self.cookie)
            .build()
            .context("Failed to build request")?;

        let method = request.method().clone();
        let url = request.url().to_string();

        let response = retry_request(&self.client, request, max_retries, self.retry_delay)
            .await
            .with_context(|| format!("Failed to make request: [{method}] {url}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body: [{method}] {url}"))?;

        log::debug!("[Request] [{method}] {url} -> {status}: {body}");

        if !status.is_success() {
            log::warn!("[Request] [{method}] {url} returned {status}");
        }

        serde_json::Value::from_str(&body)
            .with_context(|| format!("Failed to parse response: [{method}] {url}\n{body:}"))
    }
}

fn parse_response<T: DeserializeOwned>(json: serde_json::Value, what: &str) -> anyhow::Result<T> {
    serde_json::from_value::<T>(json.clone())
        .with_context(|| format!("Failed to parse {what} response\n{json:#}"))
}

fn save_form(
    session_id: &str,
    slot: AchievementSlot,
    definition: &AchievementDefinition,
) -> anyhow::Result<Vec<(&'static str, String)>> {
    let AchievementSlot { stat_id, bit_id } = slot;

    let display_name = locale::localized_payload(
        &definition.name,
        format!("NEW_ACHIEVEMENT_{stat_id}_{bit_id}_NAME"),
    )
    .context("Failed to localize display name")?;
    let description = locale::localized_payload(
        &definition.description,
        format!("NEW_ACHIEVEMENT_{stat_id}_{bit_id}_DESC"),
    )
    .context("Failed to localize description")?;

    Ok(vec![
        ("sessionid", session_id.to_string()),
        ("statid", stat_id.to_string()),
        ("bitid", bit_id.to_string()),
        ("apiname", definition.id.clone()),
        ("displayname", serde_json::Value::Object(display_name).to_string()),
        ("description", serde_json::Value::Object(description).to_string()),
        ("permission", definition.permission.to_string()),
        ("hidden", definition.hidden.to_string()),
        ("progressStat", form_value(definition.progress_stat.as_ref())),
        ("progressMin", form_value(definition.progress_min.as_ref())),
        ("progressMax", form_value(definition.progress_max.as_ref())),
    ])
}

/// Retries transport failures and server errors with a fixed delay. Requests
/// whose body cannot be replayed (streamed uploads) are sent exactly once.
async fn retry_request(
    client: &reqwest::Client,
    request: reqwest::Request,
    max_retries: usize,
    retry_delay: Duration,
) -> anyhow::Result<reqwest::Response> {
    let mut retry_count = 0;

    loop {
        if retry_count >= max_retries {
            return client
                .execute(request)
                .await
                .context("Failed to execute request");
        }

        let Some(request_attempt) = request.try_clone() else {
            return client
                .execute(request)
                .await
                .context("Failed to execute request");
        };

        let response = client.execute(request_attempt).await;

        let is_response_ok = response
            .as_ref()
            .map(|response| !response.status().is_server_error())
            .unwrap_or(false);

        if is_response_ok {
            return response.context("Failed to execute request");
        }

        tokio::time::sleep(retry_delay).await;
        retry_count += 1;
        log::info!("Retrying request: {retry_count}");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;

    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    const COOKIE_TEXT: &str = "steamLoginSecure=abc%7C%7Cdef; sessionid=f00dcafe; steamMachineAuth=1\n";

    fn sdk(server: &mockito::ServerGuard) -> Sdk {
        Sdk::new(&server.url(), "AchievementSync/test", COOKIE_TEXT, None).expect("cookie is valid")
    }

    fn definition() -> AchievementDefinition {
        AchievementDefinition {
            id: "EXPLORER".to_string(),
            icon: "explorer.jpg".to_string(),
            icon_locked: "explorer_gray.jpg".to_string(),
            name: BTreeMap::from([
                ("en".to_string(), "Explorer".to_string()),
                ("fr".to_string(), "Explorateur".to_string()),
            ]),
            description: BTreeMap::from([("en".to_string(), "Visit every map".to_string())]),
            hidden: true,
            permission: 1,
            progress_stat: Some(json!("maps_visited")),
            progress_min: Some(json!(0)),
            progress_max: Some(json!(12)),
        }
    }

    #[test]
    fn rejects_cookie_without_session_id() {
        let result = Sdk::new(DEFAULT_API_URL, "AchievementSync/test", "steamLoginSecure=abc;", None);

        assert!(result.is_err());
    }

    #[test]
    fn save_form_carries_localized_payloads_and_tokens() {
        let form = save_form("f00dcafe", AchievementSlot::new(3, 9), &definition())
            .expect("locales are supported");
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
                .expect("field is present")
        };

        let display_name: serde_json::Value =
            serde_json::from_str(&field("displayname")).expect("displayname is JSON");
        let description: serde_json::Value =
            serde_json::from_str(&field("description")).expect("description is JSON");

        assert_eq!(
            display_name,
            json!({
                "english": "Explorer",
                "french": "Explorateur",
                "token": "NEW_ACHIEVEMENT_3_9_NAME"
            })
        );
        assert_eq!(
            description,
            json!({ "english": "Visit every map", "token": "NEW_ACHIEVEMENT_3_9_DESC" })
        );
        assert_eq!(field("statid"), "3");
        assert_eq!(field("bitid"), "9");
        assert_eq!(field("apiname"), "EXPLORER");
        assert_eq!(field("hidden"), "true");
        assert_eq!(field("permission"), "1");
        assert_eq!(field("progressStat"), "maps_visited");
        assert_eq!(field("progressMin"), "0");
        assert_eq!(field("progressMax"), "12");
    }

    #[test]
    fn save_form_names_unsupported_locale() {
        let mut definition = definition();
        definition.name.insert("tlh".to_string(), "Klingon".to_string());

        let err = save_form("f00dcafe", AchievementSlot::new(0, 0), &definition)
            .expect_err("tlh is not a portal locale");

        assert!(format!("{err:#}").contains("tlh"));
    }

    #[tokio::test]
    async fn fetch_achievements_sends_cookie_and_parses_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/apps/fetchachievements/480")
            .match_header("cookie", COOKIE_TEXT.trim())
            .with_header("Content-Type", "application/json")
            .with_body(
                json!({
                    "achievements": [
                        { "api_name": "A", "stat_id": 1, "bit_id": 0, "display_name": "A" },
                        { "api_name": "B", "stat_id": 1, "bit_id": 1 }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let achievements = sdk(&server)
            .fetch_achievements("480")
            .await
            .expect("fetch should succeed");

        mock.assert_async().await;
        assert_eq!(achievements.len(), 2);
        assert_eq!(achievements[1].api_name, "B");
        assert_eq!(achievements[1].slot(), AchievementSlot::new(1, 1));
    }

    #[tokio::test]
    async fn fetch_achievements_reports_error_payload() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/apps/fetchachievements/480")
            .with_body(json!({ "success": 15 }).to_string())
            .create_async()
            .await;

        let err = sdk(&server)
            .fetch_achievements("480")
            .await
            .expect_err("payload has no achievements");

        assert!(format!("{err:#}").contains("fetch achievements"));
    }

    #[tokio::test]
    async fn non_json_body_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/apps/deleteachievement/480/1/2")
            .with_status(403)
            .with_body("<html>Access Denied</html>")
            .create_async()
            .await;

        let err = sdk(&server)
            .delete_achievement("480", AchievementSlot::new(1, 2))
            .await
            .expect_err("html is not JSON");

        assert!(format!("{err:#}").contains("Access Denied"));
    }

    #[tokio::test]
    async fn new_achievement_returns_portal_slot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/apps/newachievement/480")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("sessionid".into(), "f00dcafe".into()),
                Matcher::UrlEncoded("maxstatid".into(), "2".into()),
                Matcher::UrlEncoded("maxbitid".into(), "8".into()),
            ]))
            .with_body(json!({ "achievement": { "stat_id": 2, "bit_id": 11, "api_name": "NEW_ACHIEVEMENT_2_11" } }).to_string())
            .create_async()
            .await;

        let slot = sdk(&server)
            .new_achievement("480", AchievementSlot::new(2, 8))
            .await
            .expect("create should succeed");

        mock.assert_async().await;
        assert_eq!(slot, AchievementSlot::new(2, 11));
    }

    #[tokio::test]
    async fn save_achievement_posts_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/apps/saveachievement/480")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("sessionid".into(), "f00dcafe".into()),
                Matcher::UrlEncoded("statid".into(), "2".into()),
                Matcher::UrlEncoded("bitid".into(), "11".into()),
                Matcher::UrlEncoded("apiname".into(), "EXPLORER".into()),
                Matcher::UrlEncoded("hidden".into(), "true".into()),
            ]))
            .with_body(json!({ "success": 1 }).to_string())
            .create_async()
            .await;

        let result = sdk(&server)
            .save_achievement("480", AchievementSlot::new(2, 11), &definition())
            .await
            .expect("save should succeed");

        mock.assert_async().await;
        assert_eq!(result["success"], 1);
    }

    #[tokio::test]
    async fn upload_image_sends_multipart_fields_and_file() {
        let mut image = tempfile::NamedTempFile::new().expect("create temp image");
        image.write_all(b"not really a jpeg").expect("write temp image");

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/images/uploadachievement")
            .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("name=\"appID\"\r\n\r\n480\r\n".into()),
                Matcher::Regex("name=\"statID\"\r\n\r\n2\r\n".into()),
                Matcher::Regex("name=\"bit\"\r\n\r\n11\r\n".into()),
                Matcher::Regex("name=\"requestType\"\r\n\r\nachievement_gray\r\n".into()),
                Matcher::Regex("name=\"MAX_FILE_SIZE\"\r\n\r\n3000000\r\n".into()),
                Matcher::Regex("not really a jpeg".into()),
            ]))
            .with_body(json!({ "success": 1 }).to_string())
            .create_async()
            .await;

        sdk(&server)
            .upload_image("480", AchievementSlot::new(2, 11), IconKind::Locked, image.path())
            .await
            .expect("upload should succeed");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_image_reports_missing_file() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().expect("create temp dir");

        let err = sdk(&server)
            .upload_image(
                "480",
                AchievementSlot::new(0, 0),
                IconKind::Unlocked,
                &dir.path().join("absent.jpg"),
            )
            .await
            .expect_err("image does not exist");

        assert!(format!("{err:#}").contains("absent.jpg"));
    }

    #[tokio::test]
    async fn retries_server_errors_when_enabled() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/apps/fetchachievements/480")
            .with_status(502)
            .expect(2)
            .create_async()
            .await;

        let mut sdk = sdk(&server);
        sdk.set_max_retries(1);
        sdk.set_retry_delay(Duration::from_millis(10));

        let result = sdk.fetch_achievements("480").await;

        failing.assert_async().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn uploads_are_sent_once_even_with_retries() {
        let mut image = tempfile::NamedTempFile::new().expect("create temp image");
        image.write_all(b"icon").expect("write temp image");

        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/images/uploadachievement")
            .with_status(502)
            .expect(1)
            .create_async()
            .await;

        let mut sdk = sdk(&server);
        sdk.set_max_retries(3);
        sdk.set_retry_delay(Duration::from_millis(10));

        let result = sdk
            .upload_image("480", AchievementSlot::new(1, 2), IconKind::Unlocked, image.path())
            .await;

        failing.assert_async().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn new_achievement_is_never_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/apps/newachievement/480")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let mut sdk = sdk(&server);
        sdk.set_max_retries(2);
        sdk.set_retry_delay(Duration::from_millis(10));

        let result = sdk.new_achievement("480", AchievementSlot::new(0, 0)).await;

        failing.assert_async().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn image_digest_uses_session_cookie() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/images/apps/480/icon.jpg")
            .match_header("cookie", COOKIE_TEXT.trim())
            .with_body("abc")
            .create_async()
            .await;

        let digest = sdk(&server)
            .image_digest(&format!("{}/images/apps/480/icon.jpg", server.url()))
            .await
            .expect("digest should succeed");

        mock.assert_async().await;
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
