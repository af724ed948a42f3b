//! Watch list reconciliation.
//!
//! Every `poll_interval` the watch list is re-read and diffed against the
//! logins seen on the previous pass. New logins are resolved and connected;
//! removed logins only lose their `watched` flag, and their subscriptions
//! clean up once nothing needs them anymore.

mod watch_list;

pub use watch_list::{PLACEHOLDER, WatchList, parse_watch_list, read_watch_list};

use std::collections::BTreeSet;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::ReconcilerConfig;
use crate::domain::{ChannelInfo, Resolution};
use crate::scheduler::{ConnectReason, Supervisor};
use crate::{Error, Result};

/// What one pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Added logins that resolved and are now connecting.
    pub connected: Vec<String>,
    /// Added logins that do not exist.
    pub not_found: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct Reconciler {
    supervisor: Supervisor,
    config: ReconcilerConfig,
    known: BTreeSet<String>,
    /// Invalid entries already written to the common log.
    reported_invalid: BTreeSet<String>,
}

impl Reconciler {
    pub fn new(supervisor: Supervisor, config: ReconcilerConfig) -> Self {
        Self {
            supervisor,
            config,
            known: BTreeSet::new(),
            reported_invalid: BTreeSet::new(),
        }
    }

    /// Logins seen on the last completed pass.
    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    /// Run passes until shutdown.
    pub async fn run(mut self) {
        let cancel = self.supervisor.context().cancel.clone();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            path = %self.config.watch_list_path.display(),
            interval = ?self.config.poll_interval,
            "Watch list reconciler started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.reconcile_once().await {
                Ok(report) if !report.is_empty() => info!(
                    added = report.added.len(),
                    removed = report.removed.len(),
                    not_found = report.not_found.len(),
                    "Watch list reconciled"
                ),
                Ok(_) => debug!("Watch list unchanged"),
                Err(Error::Other(reason)) if cancel.is_cancelled() => {
                    debug!(reason = %reason, "Reconcile pass interrupted");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Watch list pass failed");
                    self.supervisor
                        .context()
                        .logs
                        .common_error("reading watch list", &e)
                        .await;
                }
            }
        }
        info!("Watch list reconciler stopped");
    }

    /// One pass: read, diff, resolve additions, flag removals.
    ///
    /// The known set is only replaced once every addition has been handled,
    /// so a pass interrupted by shutdown leaves it untouched.
    pub async fn reconcile_once(&mut self) -> Result<ReconcileReport> {
        let list = read_watch_list(&self.config.watch_list_path).await?;
        let ctx = self.supervisor.context();
        let invalid: BTreeSet<String> = list.invalid.iter().cloned().collect();
        for entry in invalid.difference(&self.reported_invalid) {
            ctx.logs
                .common(&format!("{entry} is not a valid login, skipped"))
                .await;
        }
        self.reported_invalid = invalid;

        let mut report = ReconcileReport {
            added: list.logins.difference(&self.known).cloned().collect(),
            removed: self.known.difference(&list.logins).cloned().collect(),
            ..Default::default()
        };

        for login in &report.removed {
            if ctx.registry.set_watched(login, false) {
                ctx.logs
                    .common(&format!("{login} removed from watch list"))
                    .await;
            }
        }

        for login in &report.added {
            match self.resolve_until_answered(login).await? {
                Resolution::Found(info) => {
                    self.watch(&info).await;
                    report.connected.push(login.clone());
                }
                Resolution::NotFound => {
                    ctx.logs.common(&format!("{login} is not Found!")).await;
                    report.not_found.push(login.clone());
                }
            }
        }

        self.known = list.logins;
        Ok(report)
    }

    /// Resolve `login`, retrying transient failures until shutdown.
    async fn resolve_until_answered(&self, login: &str) -> Result<Resolution> {
        let ctx = self.supervisor.context();
        loop {
            match ctx.directory.resolve(login).await {
                Ok(resolution) => return Ok(resolution),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    ctx.logs
                        .common_error(&format!("resolving {login}"), &e)
                        .await;
                }
            }
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(Error::Other(format!("shutdown while resolving {login}")));
                }
                _ = tokio::time::sleep(self.config.resolve_retry_delay) => {}
            }
        }
    }

    async fn watch(&self, info: &ChannelInfo) {
        let ctx = self.supervisor.context();
        ctx.registry.register(info);
        ctx.logs
            .common(&format!("{} is ID:{}", info.login, info.id))
            .await;
        self.supervisor
            .schedule_connect(&info.id, ConnectReason::Initial);
    }
}
