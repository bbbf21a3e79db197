use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::Submission;
use crate::reddit::model::{Listing, SubmissionData, UserList};

pub mod model;

static OAUTH_BASE: Lazy<Url> =
    Lazy::new(|| Url::parse("https://oauth.reddit.com/").expect("valid Reddit API URL"));
static TOKEN_URL: Lazy<Url> = Lazy::new(|| {
    Url::parse("https://www.reddit.com/api/v1/access_token").expect("valid Reddit token URL")
});

/// Tokens are treated as expired this many seconds early.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// The slice of the Reddit API the bot talks to. Implemented by the real
/// OAuth client and by recording fakes in tests.
#[async_trait]
pub trait RedditService: Send + Sync {
    /// Newest submissions of a subreddit, most recent first.
    async fn newest_submissions(&self, subreddit: &str, limit: u32) -> Result<Vec<Submission>>;

    /// Current view of a single submission, `None` once it is gone.
    async fn submission_by_id(&self, id: &str) -> Result<Option<Submission>>;

    async fn moderators(&self, subreddit: &str) -> Result<Vec<String>>;

    async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<()>;

    async fn remove_post(&self, fullname: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct RedditClient {
    http: Client,
    base_url: Url,
    token_url: Url,
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
    token: Arc<Mutex<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RedditClient {
    pub fn from_config(cfg: &Config) -> Self {
        Self::with_base_urls(cfg, OAUTH_BASE.clone(), TOKEN_URL.clone())
    }

    pub fn with_base_urls(cfg: &Config, base_url: Url, token_url: Url) -> Self {
        let http = Client::builder()
            .user_agent(cfg.reddit.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token_url,
            client_id: cfg.reddit.client_id.clone(),
            client_secret: cfg.reddit.client_secret.clone(),
            username: cfg.reddit.username.clone(),
            password: cfg.reddit.password.clone(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("invalid Reddit base URL")
    }

    /// Script-app password grant. The token is cached until shortly before
    /// expiry; the cache lock also serializes refreshes.
    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.access_token.clone());
            }
        }

        debug!(username = %self.username, "requesting fresh Reddit access token");
        let form = [
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        let res = self
            .http
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .context("failed to reach Reddit token endpoint")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!("Reddit token error - Status: {}, Body: {}", status, body);
            return Err(anyhow!("reddit token error {}: {}", status, body));
        }

        let grant: AccessTokenResp = res
            .json()
            .await
            .context("invalid Reddit token response JSON")?;
        let lifetime = (grant.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0);
        let token = CachedToken {
            access_token: grant.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let token = self.bearer_token().await?;
        let res = self
            .http
            .get(self.endpoint(path)?)
            .bearer_auth(token)
            .query(&[("raw_json", "1")])
            .query(query)
            .send()
            .await
            .context("failed to reach Reddit")?;
        let res = check_response(res).await?;
        res.json::<T>()
            .await
            .context("invalid Reddit response JSON")
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<reqwest::Response> {
        let token = self.bearer_token().await?;
        let res = self
            .http
            .post(self.endpoint(path)?)
            .bearer_auth(token)
            .form(form)
            .send()
            .await
            .context("failed to reach Reddit")?;
        check_response(res).await
    }
}

async fn check_response(res: reqwest::Response) -> Result<reqwest::Response> {
    if res.status() == StatusCode::TOO_MANY_REQUESTS {
        let body = res.text().await.unwrap_or_default();
        warn!("Rate limited by Reddit: {}", body);
        return Err(anyhow!("received 429 from Reddit: {}", body));
    }
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        warn!("Reddit API error - Status: {}, Body: {}", status, body);
        return Err(anyhow!("reddit error {}: {}", status, body));
    }
    Ok(res)
}

#[async_trait]
impl RedditService for RedditClient {
    async fn newest_submissions(&self, subreddit: &str, limit: u32) -> Result<Vec<Submission>> {
        let listing: Listing<SubmissionData> = self
            .get_json(
                &format!("r/{}/new", subreddit),
                &[("limit", limit.to_string())],
            )
            .await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| child.data.into())
            .collect())
    }

    async fn submission_by_id(&self, id: &str) -> Result<Option<Submission>> {
        let listing: Listing<SubmissionData> = self
            .get_json("api/info", &[("id", format!("t3_{}", id))])
            .await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .next()
            .map(|child| child.data.into()))
    }

    async fn moderators(&self, subreddit: &str) -> Result<Vec<String>> {
        let list: UserList = self
            .get_json(&format!("r/{}/about/moderators", subreddit), &[])
            .await?;
        Ok(list
            .data
            .children
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let form = [
            ("api_type", "json"),
            ("to", to),
            ("subject", subject),
            ("text", body),
        ];
        let res = self.post_form("api/compose", &form).await?;
        let payload: ComposeResponse = res
            .json()
            .await
            .context("invalid Reddit compose response JSON")?;
        if !payload.json.errors.is_empty() {
            return Err(anyhow!(
                "reddit compose rejected: {:?}",
                payload.json.errors
            ));
        }
        debug!(to = %to, subject = %subject, "sent Reddit message");
        Ok(())
    }

    async fn remove_post(&self, fullname: &str) -> Result<()> {
        let form = [("id", fullname), ("spam", "false")];
        self.post_form("api/remove", &form).await?;
        debug!(fullname = %fullname, "removed Reddit post");
        Ok(())
    }
}

#[derive(Deserialize)]
struct AccessTokenResp {
    access_token: String,
    expires_in: i64,
}

/// Envelope of `/api/compose` with `api_type=json`. A 200 with a non-empty
/// `json.errors` array is still a rejected message.
#[derive(Debug, Deserialize)]
struct ComposeResponse {
    json: ComposeJson,
}

#[derive(Debug, Deserialize)]
struct ComposeJson {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
}
