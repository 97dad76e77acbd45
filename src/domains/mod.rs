//! Moderation domains. Each one scrapes a concern in sessions and reconciles the results.
pub mod comments;
pub mod covers;
pub mod members;
pub mod stories;
pub mod stories_replies;
pub mod verify;
pub mod vk_link;

use std::{collections::BTreeMap, fmt, future::Future};

use anyhow::{Result, anyhow};
use chrono::{Local, NaiveDate};
use metrics::counter;
use tracing::{Instrument as _, error, info, info_span, warn};

use crate::{
    AppState,
    batch::batch,
    config::{DomainsConfig, SessionPolicy},
    error::Error,
    metrics::SESSION_RESULT_FAILURES,
    runner::BoundedRunner,
    session::{ResultDir, SessionId, SessionRequest},
};

/// A moderation concern, run once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    VkLink,
    Verify,
    Comments,
    Covers,
    StoriesReplies,
    Stories,
    Members,
}

impl Domain {
    /// Every domain, in the order a cycle runs them.
    pub const ORDER: [Self; 7] = [
        Self::VkLink,
        Self::Verify,
        Self::Comments,
        Self::Covers,
        Self::StoriesReplies,
        Self::Stories,
        Self::Members,
    ];

    /// Result directory and build name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::VkLink => "vk_link",
            Self::Verify => "verify",
            Self::Comments => "comments",
            Self::Covers => "covers",
            Self::StoriesReplies => "stories_replies",
            Self::Stories => "stories",
            Self::Members => "members",
        }
    }

    /// The browser script driving this domain's sessions.
    pub const fn script(self) -> &'static str {
        match self {
            Self::VkLink => "vk_link",
            Self::Verify => "verify",
            Self::Comments => "comment_stats",
            Self::Covers => "cover",
            Self::StoriesReplies => "stories_replies",
            Self::Stories => "stories",
            Self::Members => "members",
        }
    }

    /// The parameter carrying a session's comma-joined targets.
    pub const fn target_param(self) -> &'static str {
        match self {
            Self::VkLink => "GROUPS_WITH_LINKS",
            Self::Verify => "UNVERIFIED_USERS",
            _ => "GROUPS",
        }
    }

    pub fn policy(self, domains: &DomainsConfig) -> SessionPolicy {
        match self {
            Self::VkLink => domains.vk_link,
            Self::Verify => domains.verify,
            Self::Comments => domains.comments,
            Self::Covers => domains.covers,
            Self::StoriesReplies => domains.stories_replies,
            Self::Stories => domains.stories,
            Self::Members => domains.members,
        }
    }

    /// Run this domain once.
    pub async fn run(self, state: &AppState) -> Result<()> {
        match self {
            Self::VkLink => vk_link::run(state).await,
            Self::Verify => verify::run(state).await,
            Self::Comments => comments::run(state).await,
            Self::Covers => covers::run(state).await,
            Self::StoriesReplies => stories_replies::run(state).await,
            Self::Stories => stories::run(state).await,
            Self::Members => members::run(state).await,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The date violations are issued on.
pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Launches one domain's sessions and hands their results to a reconcile step.
#[derive(Clone)]
pub(crate) struct Scraper {
    pub(crate) state: AppState,
    domain: Domain,
    results: ResultDir,
}

/// What happened to a domain's sessions.
#[derive(Debug, Default)]
pub(crate) struct SessionReport {
    /// Every session that was started, in chunk order.
    pub(crate) sessions: Vec<SessionId>,
    /// Sessions whose result file was missing or unusable.
    pub(crate) unusable_results: usize,
    /// Failures that must reach the cycle: spawn and ledger errors, panics.
    pub(crate) errors: Vec<anyhow::Error>,
}

impl SessionReport {
    /// Fail if anything other than an unusable result went wrong.
    pub(crate) fn into_result(self) -> Result<()> {
        let total = self.sessions.len();
        let mut errors = self.errors.into_iter();
        match errors.next() {
            None => Ok(()),
            Some(first) => Err(first.context(format!(
                "{} of {total} sessions failed",
                errors.len() + 1
            ))),
        }
    }
}

impl Scraper {
    pub(crate) async fn new(state: &AppState, domain: Domain) -> Result<Self> {
        let results = ResultDir::create(&state.config.results_path, domain.name()).await?;
        Ok(Self {
            state: state.clone(),
            domain,
            results,
        })
    }

    pub(crate) const fn results(&self) -> &ResultDir {
        &self.results
    }

    /// Credentials and bookkeeping every session receives.
    fn params(&self, session: &SessionId, targets: &[i64]) -> BTreeMap<String, String> {
        let credentials = &self.state.config.credentials;
        let targets = targets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        BTreeMap::from([
            ("VK_OTP".to_owned(), credentials.scraper.totp.clone()),
            ("VK_USERNAME".to_owned(), credentials.scraper.phone.clone()),
            ("VK_PASSWORD".to_owned(), credentials.scraper.password.clone()),
            (
                "BROWSERSTACK_USERNAME".to_owned(),
                credentials.browserstack.login.clone(),
            ),
            (
                "BROWSERSTACK_ACCESS_KEY".to_owned(),
                credentials.browserstack.api_key.clone(),
            ),
            (
                "BROWSERSTACK_BUILD_NAME".to_owned(),
                self.domain.name().to_owned(),
            ),
            ("SESSION_NAME".to_owned(), session.to_string()),
            (self.domain.target_param().to_owned(), targets),
        ])
    }

    /// Run one session over `targets` and wait for it to exit.
    pub(crate) async fn launch(&self, session: &SessionId, targets: &[i64]) -> Result<()> {
        info!(targets = targets.len(), "starting session");
        self.state
            .launcher
            .launch(SessionRequest {
                script: self.domain.script(),
                session: session.clone(),
                result_path: self.results.path(session),
                params: self.params(session, targets),
            })
            .await
    }

    /// Split `targets` into sessions, run them under the domain's policy and
    /// reconcile each result. A session's result file is removed once reconciled.
    ///
    /// Every session is joined before this returns, whatever happened to its siblings.
    pub(crate) async fn run_chunks<F, Fut>(&self, targets: &[i64], reconcile: F) -> SessionReport
    where
        F: Fn(Self, SessionId) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let policy = self.domain.policy(&self.state.config.domains);
        let units: Vec<(SessionId, Vec<i64>)> = batch(targets, policy.chunk_size)
            .into_iter()
            .map(|chunk| (SessionId::generate(), chunk))
            .collect();
        let sessions: Vec<SessionId> = units.iter().map(|(id, _)| id.clone()).collect();
        info!(domain = %self.domain, sessions = units.len(), "running sessions");

        let total = units.len();
        let outcomes = BoundedRunner::from_policy(&policy)
            .run_all(units, |index, (session, chunk)| {
                let scraper = self.clone();
                let reconcile = reconcile.clone();
                let span = info_span!(
                    "session",
                    domain = %self.domain,
                    session = %session,
                    chunk = index + 1,
                    of = total
                );
                async move {
                    scraper.launch(&session, &chunk).await?;
                    reconcile(scraper.clone(), session.clone()).await?;
                    scraper.results.cleanup(&session).await
                }
                .instrument(span)
            })
            .await;

        let mut report = SessionReport {
            sessions,
            ..SessionReport::default()
        };
        for (session, outcome) in report.sessions.iter().zip(outcomes) {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.downcast_ref::<Error>().is_some() => {
                    error!(domain = %self.domain, %session, "failed to reconcile session: {e:#}");
                    counter!(SESSION_RESULT_FAILURES, "domain" => self.domain.name()).increment(1);
                    report.unusable_results += 1;
                }
                Ok(Err(e)) => {
                    error!(domain = %self.domain, %session, "session failed: {e:#}");
                    report.errors.push(e.context(format!("session {session}")));
                }
                Err(e) => {
                    error!(domain = %self.domain, %session, "session task panicked: {e}");
                    report.errors.push(anyhow!("session {session} panicked: {e}"));
                }
            }
        }
        report
    }
}

/// Log per-group outcomes of a toggle-style session.
pub(crate) fn log_outcomes(outcomes: &BTreeMap<i64, bool>, done: &str, failed: &str) {
    for (group_id, ok) in outcomes {
        if *ok {
            info!(group_id, "{done}");
        } else {
            warn!(group_id, "{failed}");
        }
    }
}
