//! VK lookups used outside the browser sessions.
use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::config::VkConfig;

/// A VK profile as returned by `users.get`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VkUser {
    pub id: i64,
    #[serde(default)]
    pub screen_name: String,
}

#[async_trait]
pub trait VkDirectory: Send + Sync {
    /// Look up profiles by screen name. Unknown names are simply absent from the result.
    async fn resolve_screen_names(&self, names: &[String]) -> Result<Vec<VkUser>>;

    /// Whether the group has its vk.link site enabled.
    async fn site_exists(&self, group_id: i64) -> Result<bool>;
}

/// Reduce a profile link to its screen name.
pub fn screen_name(link: &str) -> &str {
    link.strip_prefix("https://vk.com/")
        .or_else(|| link.strip_prefix("vk.com/"))
        .unwrap_or(link)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ApiResponse<T> {
    Ok { response: T },
    Err { error: ApiError },
}

#[derive(Deserialize)]
struct ApiError {
    error_code: i64,
    error_msg: String,
}

pub struct VkClient {
    client: reqwest::Client,
    api_url: Url,
    access_token: String,
    api_version: String,
    link_template: String,
}

impl VkClient {
    pub fn new(client: reqwest::Client, config: &VkConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            access_token: config.access_token.clone(),
            api_version: config.api_version.clone(),
            link_template: config.link_template.clone(),
        }
    }

    fn site_url(&self, group_id: i64) -> String {
        self.link_template.replace("{group}", &group_id.to_string())
    }
}

#[async_trait]
impl VkDirectory for VkClient {
    async fn resolve_screen_names(&self, names: &[String]) -> Result<Vec<VkUser>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let url = self
            .api_url
            .join("users.get")
            .context("failed to build users.get url")?;
        let response: ApiResponse<Vec<VkUser>> = self
            .client
            .post(url)
            .form(&[
                ("user_ids", names.join(",").as_str()),
                ("fields", "screen_name"),
                ("access_token", self.access_token.as_str()),
                ("v", self.api_version.as_str()),
            ])
            .send()
            .await
            .context("failed to call users.get")?
            .error_for_status()
            .context("users.get failed")?
            .json()
            .await
            .context("failed to parse users.get response")?;

        match response {
            ApiResponse::Ok { response } => Ok(response),
            ApiResponse::Err { error } => {
                bail!("users.get error {}: {}", error.error_code, error.error_msg)
            }
        }
    }

    async fn site_exists(&self, group_id: i64) -> Result<bool> {
        let url = self.site_url(group_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to probe {url}"))?;

        let status = response.status();
        if status.is_server_error() {
            warn!(group_id, %status, "site probe answered with a server error");
        }
        Ok(status == reqwest::StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, net::SocketAddr};

    use axum::{
        Form, Json, Router,
        extract::Path,
        http::StatusCode,
        routing::{get, post},
    };
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn strips_profile_prefixes() {
        assert_eq!(screen_name("https://vk.com/durov"), "durov");
        assert_eq!(screen_name("vk.com/id1"), "id1");
        assert_eq!(screen_name("durov"), "durov");
    }

    async fn users_get(Form(form): Form<HashMap<String, String>>) -> Json<Value> {
        if form.get("access_token").map(String::as_str) != Some("token") {
            return Json(json!({
                "error": { "error_code": 5, "error_msg": "User authorization failed" },
            }));
        }
        let users: Vec<Value> = form["user_ids"]
            .split(',')
            .filter(|name| *name != "ghost")
            .enumerate()
            .map(|(i, name)| json!({ "id": 100 + i, "screen_name": name, "first_name": "A" }))
            .collect();
        Json(json!({ "response": users }))
    }

    async fn site(Path(club): Path<String>) -> StatusCode {
        if club == "club1" {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        }
    }

    async fn client(token: &str) -> Result<VkClient> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let address = listener.local_addr()?;
        let app = Router::new()
            .route("/method/users.get", post(users_get))
            .route("/link/{club}", get(site));
        drop(tokio::spawn(async move { axum::serve(listener, app).await }));

        let config = VkConfig {
            api_url: Url::parse(&format!("http://{address}/method/"))?,
            access_token: token.to_owned(),
            link_template: format!("http://{address}/link/club{{group}}"),
            ..VkConfig::default()
        };
        Ok(VkClient::new(reqwest::Client::new(), &config))
    }

    #[tokio::test]
    async fn resolves_known_names() -> Result<()> {
        let vk = client("token").await?;
        let names = vec!["durov".to_owned(), "ghost".to_owned(), "id5".to_owned()];
        let users = vk.resolve_screen_names(&names).await?;
        assert_eq!(
            users,
            vec![
                VkUser { id: 100, screen_name: "durov".to_owned() },
                VkUser { id: 101, screen_name: "id5".to_owned() },
            ]
        );
        assert!(vk.resolve_screen_names(&[]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn api_errors_are_reported() -> Result<()> {
        let vk = client("wrong").await?;
        let err = vk.resolve_screen_names(&["durov".to_owned()]).await.unwrap_err();
        assert!(err.to_string().contains("User authorization failed"));
        Ok(())
    }

    #[tokio::test]
    async fn probes_group_sites() -> Result<()> {
        let vk = client("token").await?;
        assert!(vk.site_exists(1).await?);
        assert!(!vk.site_exists(2).await?);
        Ok(())
    }
}
