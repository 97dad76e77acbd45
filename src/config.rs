use std::{
    fmt,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

/// Builds a `NonZeroUsize` from a literal known to be non-zero.
const fn non_zero(n: usize) -> NonZeroUsize {
    match NonZeroUsize::new(n) {
        Some(n) => n,
        None => panic!("value must be non-zero"),
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite connection string.
    pub db: String,
    /// Directory scrape sessions write their result files into.
    pub results_path: PathBuf,
    /// Pause between two moderation cycles.
    pub cycle_interval_secs: u64,
    pub launcher: LauncherConfig,
    pub credentials: CredentialsConfig,
    pub toxicity: ToxicityConfig,
    pub vk: VkConfig,
    pub moderation: ModerationConfig,
    pub domains: DomainsConfig,
    pub metrics: Option<MetricConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db: "sqlite://data/groupwarden.db".to_owned(),
            results_path: PathBuf::from("scripts_results"),
            cycle_interval_secs: 24 * 60 * 60,
            launcher: LauncherConfig::default(),
            credentials: CredentialsConfig::default(),
            toxicity: ToxicityConfig::default(),
            vk: VkConfig::default(),
            moderation: ModerationConfig::default(),
            domains: DomainsConfig::default(),
            metrics: None,
        }
    }
}

impl AppConfig {
    /// Configuration sources, lowest precedence first: per-domain session
    /// defaults, the TOML file at `path`, then `GROUPWARDEN_` environment
    /// variables with nested keys split on `__`.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::default("domains", DomainsConfig::default()))
            .admerge(Toml::file(path))
            .admerge(Env::prefixed("GROUPWARDEN_").split("__"))
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

/// How scrape sessions are spawned.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LauncherConfig {
    /// Program to execute for every session.
    pub program: String,
    /// Arguments. `{script}` is replaced with the domain's script name.
    pub args: Vec<String>,
    /// Working directory of the spawned program, if not the current one.
    pub workdir: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: "browserstack-sdk".to_owned(),
            args: vec![
                "scripts/{script}.py".to_owned(),
                "--browserstack.config".to_owned(),
                "browserstack.yml".to_owned(),
            ],
            workdir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    /// The service account the scrape sessions log in with.
    pub scraper: ScraperAccount,
    pub browserstack: BrowserstackCredentials,
}

#[derive(Deserialize, Clone, Default)]
#[serde(default)]
pub struct ScraperAccount {
    pub phone: String,
    pub password: String,
    /// TOTP secret for the second factor.
    pub totp: String,
}

impl fmt::Debug for ScraperAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScraperAccount")
            .field("phone", &self.phone)
            .field("password", &"<redacted>")
            .field("totp", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize, Clone, Default)]
#[serde(default)]
pub struct BrowserstackCredentials {
    pub login: String,
    pub api_key: String,
}

impl fmt::Debug for BrowserstackCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserstackCredentials")
            .field("login", &self.login)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct ToxicityConfig {
    pub api_key: String,
    /// The `comments:analyze` endpoint.
    pub endpoint: Url,
    /// Language tag sent along with every comment.
    pub language: String,
    /// Fixed wait before retrying a rate-limited request.
    pub retry_delay_ms: u64,
}

impl Default for ToxicityConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: Url::parse("https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze")
                .expect("static URL should parse"),
            language: "ru".to_owned(),
            retry_delay_ms: 1000,
        }
    }
}

impl fmt::Debug for ToxicityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToxicityConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("language", &self.language)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct VkConfig {
    /// Base URL of the VK API methods.
    pub api_url: Url,
    pub access_token: String,
    pub api_version: String,
    /// Group site address; `{group}` is replaced with the group id.
    pub link_template: String,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse("https://api.vk.com/method/").expect("static URL should parse"),
            access_token: String::new(),
            api_version: "5.199".to_owned(),
            link_template: "https://vk.link/club{group}".to_owned(),
        }
    }
}

impl fmt::Debug for VkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VkConfig")
            .field("api_url", &self.api_url.as_str())
            .field("access_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("link_template", &self.link_template)
            .finish()
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ModerationConfig {
    /// Active warnings a user may hold before the next offense becomes a ban.
    pub warning_limit: usize,
    /// Lifetime of a warning in days. Warnings never expire when unset.
    pub warning_ttl_days: Option<u32>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            warning_limit: 3,
            warning_ttl_days: None,
        }
    }
}

/// Chunking and rate shaping of one domain's sessions.
///
/// Fields missing from a partial `[domains.<name>]` table keep that domain's
/// defaults, see [`AppConfig::figment`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Targets handed to a single session.
    pub chunk_size: NonZeroUsize,
    /// Sessions allowed to run at once.
    pub concurrency: NonZeroUsize,
    /// Minimum seconds between two session launches.
    pub spacing_secs: u64,
    /// Seconds a finished session keeps its slot.
    pub cooldown_secs: u64,
}

impl SessionPolicy {
    /// One session at a time, no shaping.
    pub const fn chunked(chunk_size: usize) -> Self {
        Self {
            chunk_size: non_zero(chunk_size),
            concurrency: non_zero(1),
            spacing_secs: 0,
            cooldown_secs: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DomainsConfig {
    pub vk_link: SessionPolicy,
    pub verify: SessionPolicy,
    pub comments: SessionPolicy,
    pub covers: SessionPolicy,
    pub stories_replies: SessionPolicy,
    pub stories: SessionPolicy,
    pub members: SessionPolicy,
}

impl Default for DomainsConfig {
    fn default() -> Self {
        Self {
            vk_link: SessionPolicy::chunked(1000),
            verify: SessionPolicy {
                chunk_size: non_zero(500),
                concurrency: non_zero(2),
                spacing_secs: 90,
                cooldown_secs: 20,
            },
            comments: SessionPolicy::chunked(5),
            covers: SessionPolicy::chunked(20),
            stories_replies: SessionPolicy::chunked(20),
            stories: SessionPolicy::chunked(20),
            members: SessionPolicy::chunked(10),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum MetricConfig {
    /// Serve a Prometheus scrape endpoint.
    PrometheusListener(PrometheusListenerConfig),
}

#[derive(Deserialize, Debug, Clone)]
pub struct PrometheusListenerConfig {
    pub address: SocketAddr,
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_match_the_observed_policies() {
        let config = AppConfig::default();
        assert_eq!(config.cycle_interval(), Duration::from_secs(86_400));
        assert_eq!(config.domains.comments.chunk_size.get(), 5);
        assert_eq!(config.domains.members.chunk_size.get(), 10);
        assert_eq!(config.domains.stories.chunk_size.get(), 20);
        assert_eq!(config.domains.verify.chunk_size.get(), 500);
        assert_eq!(config.domains.verify.concurrency.get(), 2);
        assert_eq!(config.domains.verify.spacing_secs, 90);
        assert_eq!(config.domains.verify.cooldown_secs, 20);
        assert_eq!(config.moderation.warning_limit, 3);
        assert_eq!(config.toxicity.language, "ru");
    }

    #[test]
    fn file_and_environment_are_layered() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "groupwarden.toml",
                r#"
                db = "sqlite://moderation.db"

                [domains.comments]
                chunk_size = 8

                [credentials.scraper]
                phone = "+70000000000"
                password = "hunter2"
                "#,
            )?;
            jail.set_env("GROUPWARDEN_MODERATION__WARNING_TTL_DAYS", "30");

            let config: AppConfig = AppConfig::figment(Path::new("groupwarden.toml")).extract()?;

            assert_eq!(config.db, "sqlite://moderation.db");
            assert_eq!(config.domains.comments.chunk_size.get(), 8);
            assert_eq!(config.domains.comments.concurrency.get(), 1);
            assert_eq!(config.domains.members.chunk_size.get(), 10);
            assert_eq!(config.moderation.warning_ttl_days, Some(30));
            assert!(!format!("{:?}", config.credentials).contains("hunter2"));
            Ok(())
        });
    }

    #[test]
    fn partial_domain_tables_keep_the_domain_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "groupwarden.toml",
                r#"
                [domains.verify]
                chunk_size = 100

                [domains.stories]
                concurrency = 2
                "#,
            )?;
            jail.set_env("GROUPWARDEN_DOMAINS__MEMBERS__SPACING_SECS", "15");

            let config: AppConfig = AppConfig::figment(Path::new("groupwarden.toml")).extract()?;
            let domains = config.domains;

            assert_eq!(domains.verify.chunk_size.get(), 100);
            assert_eq!(domains.verify.concurrency.get(), 2);
            assert_eq!(domains.verify.spacing_secs, 90);
            assert_eq!(domains.verify.cooldown_secs, 20);

            assert_eq!(domains.stories.chunk_size.get(), 20);
            assert_eq!(domains.stories.concurrency.get(), 2);

            assert_eq!(domains.members.chunk_size.get(), 10);
            assert_eq!(domains.members.spacing_secs, 15);
            assert_eq!(domains.comments, SessionPolicy::chunked(5));
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_| {
            let config: AppConfig = AppConfig::figment(Path::new("absent.toml")).extract()?;
            assert_eq!(config.domains.verify.spacing_secs, 90);
            assert_eq!(config.db, "sqlite://data/groupwarden.db");
            Ok(())
        });
    }
}
