use crate::loader::{CrawlReport, EntityStatementTreeLoader};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

/// Refresh lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Running,
    /// Running, and another refresh was requested meanwhile
    Stale,
}

impl RefreshState {
    /// Returns whether the caller should start a crawl
    fn begin(&mut self) -> bool {
        match self {
            RefreshState::Idle => {
                *self = RefreshState::Running;
                true
            }
            RefreshState::Running | RefreshState::Stale => {
                *self = RefreshState::Stale;
                false
            }
        }
    }

    /// Returns whether a follow-up crawl is due
    fn finish(&mut self) -> bool {
        match self {
            RefreshState::Stale => {
                *self = RefreshState::Running;
                true
            }
            RefreshState::Running | RefreshState::Idle => {
                *self = RefreshState::Idle;
                false
            }
        }
    }
}

/// Periodic and on-demand federation refresh
pub struct RefreshScheduler {
    loader: Arc<EntityStatementTreeLoader>,
    root_id: String,
    period: Duration,
    state: Mutex<RefreshState>,
    notify: Notify,
}

impl RefreshScheduler {
    pub fn new(loader: Arc<EntityStatementTreeLoader>, root_id: impl Into<String>, period: Duration) -> Self {
        Self {
            loader,
            root_id: root_id.into(),
            period,
            state: Mutex::new(RefreshState::Idle),
            notify: Notify::new(),
        }
    }

    /// Start the refresh loop; the first crawl runs immediately
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Starting federation refresh for {} every {}s",
            self.root_id,
            self.period.as_secs()
        );
        tokio::spawn(Self::refresh_job(self))
    }

    pub async fn state(&self) -> RefreshState {
        *self.state.lock().await
    }

    /// Ask for a crawl outside the regular schedule
    pub async fn request_refresh(&self) {
        let mut state = self.state.lock().await;
        match *state {
            RefreshState::Idle => self.notify.notify_one(),
            RefreshState::Running | RefreshState::Stale => *state = RefreshState::Stale,
        }
    }

    /// Crawl now, unless a crawl is already running, in which case one
    /// follow-up crawl is scheduled after it
    ///
    /// Returns the report of the last crawl this call ran.
    pub async fn refresh(&self) -> Option<CrawlReport> {
        if !self.state.lock().await.begin() {
            info!("Refresh already running, marked stale");
            return None;
        }

        loop {
            let report = self.loader.load(&self.root_id).await;
            if !report.dropped.is_empty() {
                warn!(
                    "Crawl {} dropped {} step(s)",
                    report.crawl_id,
                    report.dropped.len()
                );
            }

            if !self.state.lock().await.finish() {
                return Some(report);
            }
            info!("Federation changed during crawl {}, crawling again", report.crawl_id);
        }
    }

    async fn refresh_job(scheduler: Arc<Self>) {
        let mut ticker = interval(scheduler.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = scheduler.notify.notified() => {}
            }

            if let Some(report) = scheduler.refresh().await {
                info!(
                    "Federation refresh {} finished with {} step(s)",
                    report.crawl_id, report.completed_steps
                );
            }
        }
    }
}
