//! The admission pipeline and administrative operations.
//!
//! Checks run in a fixed order and the first failing check decides:
//! site gate (service active, maintenance), block table, geo rule, per-IP rate
//! limit, attack detection. Table mutations (rate-limit block, attack block)
//! happen before anything is persisted. Every collaborator call is bounded by
//! a timeout, and store or alert failures never change a decision.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::analytics::{summarize, summary_window, SiteSummary, TrafficSummary};
use super::decision::{Decision, DenyReason};
use super::housekeeper::{Housekeeper, HousekeeperHandle};
use super::state::MonitorState;
use super::stats::{MonitorStats, StatsSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::collab::{
    AttackQuery, Collaborators, MemoryLogStore, StaticResolver, StoredAttack, TimeRange,
    TracingAlerter,
};
use crate::config::StormConfig;
use crate::error::Result;
use crate::guard::{BlockRecord, Detection};
use crate::records::{AttackId, AttackLogEntry, AttackStatus, TrafficLogEntry, TrafficStatus};
use crate::site::SiteConfig;

/// Reason stored on blocks placed by the per-IP limiter.
pub const RATE_LIMIT_BLOCK_REASON: &str = "Rate limit exceeded";
/// Reason stored on blocks placed during an attack.
pub const ATTACK_BLOCK_REASON: &str = "Part of DDoS attack";

/// Timing knobs of the pipeline and housekeeper.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub rate_limit_block: Duration,
    pub attack_block: Duration,
    pub attack_horizon: Duration,
    pub resolver_timeout: std::time::Duration,
    pub store_timeout: std::time::Duration,
    pub alert_timeout: std::time::Duration,
    pub housekeeping_interval: std::time::Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&StormConfig::default())
    }
}

impl From<&StormConfig> for MonitorSettings {
    fn from(config: &StormConfig) -> Self {
        Self {
            rate_limit_block: config.rate_limit_block(),
            attack_block: config.attack_block(),
            attack_horizon: config.attack_horizon(),
            resolver_timeout: config.resolver_timeout(),
            store_timeout: config.store_timeout(),
            alert_timeout: config.alert_timeout(),
            housekeeping_interval: config.housekeeping_interval(),
        }
    }
}

/// The admission engine.
///
/// Cheap to clone; clones share state, collaborators, statistics and the
/// housekeeping task. The task stops on [`shutdown`](Self::shutdown) or once
/// the last clone is dropped.
#[derive(Clone)]
pub struct Monitor {
    state: MonitorState,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    stats: Arc<MonitorStats>,
    housekeeping: Arc<Mutex<Option<HousekeeperHandle>>>,
}

impl Monitor {
    /// Build a monitor without periodic housekeeping.
    ///
    /// Maintenance then only happens through [`housekeeper`](Self::housekeeper)
    /// ticks driven by the caller.
    pub fn new(
        state: MonitorState,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            state,
            collaborators,
            clock,
            settings,
            stats: Arc::new(MonitorStats::new()),
            housekeeping: Arc::new(Mutex::new(None)),
        }
    }

    /// Build a monitor and start housekeeping on the current tokio runtime.
    pub fn start(
        state: MonitorState,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        let monitor = Self::new(state, collaborators, clock, settings);
        let handle = monitor.housekeeper().spawn();
        *monitor.housekeeping.lock() = Some(handle);
        monitor
    }

    /// Start a monitor with the in-process collaborators described by `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &StormConfig) -> Result<Self> {
        let resolver = StaticResolver::from_table(&config.resolver.networks)?;
        if resolver.is_empty() {
            info!("Country table is empty, every address resolves to an unknown country");
        } else {
            debug!(networks = resolver.len(), "Country table loaded");
        }

        let collaborators = Collaborators::new(
            Arc::new(resolver),
            Arc::new(MemoryLogStore::with_retention(
                config.store.max_traffic_entries,
            )),
            Arc::new(TracingAlerter),
        );
        Ok(Self::start(
            MonitorState::with_sites(config.sites.iter().cloned()),
            collaborators,
            Arc::new(SystemClock),
            MonitorSettings::from(config),
        ))
    }

    /// Stop periodic housekeeping and wait for the task to finish.
    ///
    /// Idempotent; a monitor built with [`new`](Self::new) has nothing to stop.
    pub async fn shutdown(&self) {
        let handle = self.housekeeping.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    /// Whether the housekeeping task is running.
    pub fn is_housekeeping(&self) -> bool {
        self.housekeeping
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Decide whether to admit one request.
    ///
    /// Returns `Err(UnknownSite)` for an unregistered site. Requests refused by
    /// the site gate are not logged; every other decision produces exactly one
    /// traffic log entry.
    #[instrument(level = "debug", skip(self, path))]
    pub async fn decide(
        &self,
        site: &str,
        ip: Option<&str>,
        path: Option<&str>,
    ) -> Result<Decision> {
        let config = self.state.sites.get(site)?;
        let now = self.clock.now();

        if !config.service_active {
            debug!(site = %site, "Service inactive, refusing request");
            return Ok(self.finish(Decision::deny(
                TrafficStatus::Blocked,
                DenyReason::ServiceUnavailable,
            )));
        }
        if config.maintenance {
            debug!(site = %site, "Site in maintenance, refusing request");
            return Ok(self.finish(Decision::deny(
                TrafficStatus::Blocked,
                DenyReason::Maintenance,
            )));
        }

        let Some(ip) = ip.map(str::trim).filter(|ip| !ip.is_empty()) else {
            warn!(site = %site, "Request without client address admitted unchecked");
            let decision = Decision::allow();
            self.persist_traffic(traffic_entry(&config, now, None, None, path, &decision))
                .await;
            return Ok(self.finish(decision));
        };

        let country = self.resolve_country(ip).await;
        let (decision, episode) = self.evaluate(&config, ip, country.as_deref(), now);

        self.persist_traffic(traffic_entry(
            &config,
            now,
            Some(ip),
            country,
            path,
            &decision,
        ))
        .await;
        if let Some(episode) = episode {
            self.report_attack(&config, episode).await;
        }

        Ok(self.finish(decision))
    }

    /// The synchronous part of the pipeline: every table read and write.
    fn evaluate(
        &self,
        config: &SiteConfig,
        ip: &str,
        country: Option<&str>,
        now: DateTime<Utc>,
    ) -> (Decision, Option<AttackLogEntry>) {
        if self.state.blocks.is_blocked(&config.name, ip, now) {
            return (
                Decision::deny(TrafficStatus::Blocked, DenyReason::IpBlocked),
                None,
            );
        }

        if !config.country_permitted(country) {
            debug!(site = %config.name, ip = %ip, country = ?country, "Country not permitted");
            return (
                Decision::deny(TrafficStatus::Blocked, DenyReason::CountryBlocked),
                None,
            );
        }

        if !self.state.limiter.admit(config, ip, now) {
            self.state.blocks.block(
                BlockRecord::new(&config.name, ip, now)
                    .with_reason(RATE_LIMIT_BLOCK_REASON)
                    .with_ttl(Some(self.settings.rate_limit_block))
                    .with_country(country.map(str::to_string)),
            );
            return (
                Decision::deny(TrafficStatus::RateLimited, DenyReason::RateLimitExceeded),
                None,
            );
        }

        let episode = match self.state.detector.observe(config, ip, now) {
            Detection::Normal => return (Decision::allow(), None),
            Detection::Ongoing { .. } => None,
            Detection::Escalated(entry) => Some(entry),
        };

        self.state.blocks.block(
            BlockRecord::new(&config.name, ip, now)
                .with_reason(ATTACK_BLOCK_REASON)
                .with_ttl(Some(self.settings.attack_block))
                .with_country(country.map(str::to_string)),
        );
        (
            Decision::deny(TrafficStatus::Blocked, DenyReason::AttackDetected),
            episode,
        )
    }

    fn finish(&self, decision: Decision) -> Decision {
        self.stats.record_decision(decision.admit);
        decision
    }

    /// Resolve a country, treating failures and timeouts as unknown.
    async fn resolve_country(&self, ip: &str) -> Option<String> {
        let lookup = self.collaborators.resolver.resolve(ip);
        match timeout(self.settings.resolver_timeout, lookup).await {
            Ok(Ok(country)) => country
                .map(|code| code.trim().to_ascii_uppercase())
                .filter(|code| !code.is_empty()),
            Ok(Err(e)) => {
                self.stats.record_resolver_fallback();
                debug!(ip = %ip, error = %e, "Country lookup failed, treating as unknown");
                None
            }
            Err(_) => {
                self.stats.record_resolver_fallback();
                debug!(ip = %ip, "Country lookup timed out, treating as unknown");
                None
            }
        }
    }

    async fn persist_traffic(&self, entry: TrafficLogEntry) {
        let write = self.collaborators.store.persist_traffic(entry);
        match timeout(self.settings.store_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.record_persistence_failure();
                warn!(error = %e, "Failed to persist traffic log entry");
            }
            Err(_) => {
                self.stats.record_persistence_failure();
                warn!("Timed out persisting traffic log entry");
            }
        }
    }

    async fn report_attack(&self, config: &SiteConfig, entry: AttackLogEntry) {
        self.stats.record_attack();

        let write = self.collaborators.store.persist_attack(entry.clone());
        match timeout(self.settings.store_timeout, write).await {
            Ok(Ok(id)) => info!(site = %config.name, attack_id = %id, "Attack episode recorded"),
            Ok(Err(e)) => {
                self.stats.record_persistence_failure();
                warn!(site = %config.name, error = %e, "Failed to persist attack log entry");
            }
            Err(_) => {
                self.stats.record_persistence_failure();
                warn!(site = %config.name, "Timed out persisting attack log entry");
            }
        }

        if !config.email_alerts {
            return;
        }
        let alert = self.collaborators.alerter.send_alert(&config.name, &entry);
        match timeout(self.settings.alert_timeout, alert).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.record_alert_failure();
                warn!(site = %config.name, error = %e, "Failed to send attack alert");
            }
            Err(_) => {
                self.stats.record_alert_failure();
                warn!(site = %config.name, "Timed out sending attack alert");
            }
        }
    }

    // Administrative operations

    /// Block an address on a site. `ttl` of `None` blocks until unblocked.
    ///
    /// Returns `true` if a new record was created.
    pub async fn block_ip(
        &self,
        site: &str,
        ip: &str,
        reason: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.state.sites.get(site)?;
        let country = self.resolve_country(ip).await;
        let mut record = BlockRecord::new(site, ip, self.clock.now())
            .with_ttl(ttl)
            .with_country(country);
        record.reason = reason.map(str::to_string);
        Ok(self.state.blocks.block(record))
    }

    /// Lift a block. Idempotent; returns `true` if a block was removed.
    pub fn unblock_ip(&self, site: &str, ip: &str) -> Result<bool> {
        self.state.sites.get(site)?;
        Ok(self.state.blocks.unblock(site, ip))
    }

    pub fn is_blocked(&self, site: &str, ip: &str) -> Result<bool> {
        self.state.sites.get(site)?;
        Ok(self.state.blocks.is_blocked(site, ip, self.clock.now()))
    }

    /// Active blocks on a site, ordered by address.
    pub fn blocked_ips(&self, site: &str) -> Result<Vec<BlockRecord>> {
        self.state.sites.get(site)?;
        Ok(self.state.blocks.list(site, self.clock.now()))
    }

    /// Drop the site's rate counters and idle its attack window.
    pub fn reset_site_counters(&self, site: &str) -> Result<()> {
        self.state.sites.get(site)?;
        let counters = self.state.limiter.reset_site(site);
        let window_reset = self.state.detector.reset_site(site);
        info!(site = %site, counters, window_reset, "Traffic counters reset");
        Ok(())
    }

    pub fn start_service(&self, site: &str) -> Result<()> {
        self.set_service_active(site, true)
    }

    pub fn stop_service(&self, site: &str) -> Result<()> {
        self.set_service_active(site, false)
    }

    fn set_service_active(&self, site: &str, active: bool) -> Result<()> {
        let mut changed = false;
        self.state.sites.update(site, |config| {
            changed = config.service_active != active;
            config.service_active = active;
        })?;
        if changed {
            info!(site = %site, active, "Service state changed");
        }
        Ok(())
    }

    pub fn set_maintenance(&self, site: &str, on: bool) -> Result<()> {
        let mut changed = false;
        self.state.sites.update(site, |config| {
            changed = config.maintenance != on;
            config.maintenance = on;
        })?;
        if changed {
            info!(site = %site, maintenance = on, "Maintenance mode changed");
        }
        Ok(())
    }

    /// Register or replace a site. Returns `true` if it was new.
    pub fn register_site(&self, config: SiteConfig) -> bool {
        self.state.sites.upsert(config)
    }

    /// Close an attack episode at the current time.
    ///
    /// Returns `false` if the site has no episode with that id.
    pub async fn mark_mitigated(&self, site: &str, id: AttackId) -> Result<bool> {
        self.state.sites.get(site)?;
        let owned = self
            .collaborators
            .store
            .attack_logs(AttackQuery::for_site(site))
            .await?
            .iter()
            .any(|attack| attack.id == id);
        if !owned {
            debug!(site = %site, attack_id = %id, "Attack not recorded for this site");
            return Ok(false);
        }

        let now = self.clock.now();
        let updated = self.collaborators.store.mark_mitigated(id, now).await?;
        if updated {
            info!(site = %site, attack_id = %id, "Attack marked mitigated");
        }
        Ok(updated)
    }

    /// Traffic entries of a site in `range`, optionally of one status.
    pub async fn traffic_logs(
        &self,
        site: &str,
        range: TimeRange,
        status: Option<TrafficStatus>,
    ) -> Result<Vec<TrafficLogEntry>> {
        self.state.sites.get(site)?;
        let mut logs = self.collaborators.store.traffic_logs(site, range).await?;
        if let Some(status) = status {
            logs.retain(|entry| entry.status == status);
        }
        Ok(logs)
    }

    /// Attack episodes matching `query`, newest first.
    pub async fn attack_logs(&self, query: AttackQuery) -> Result<Vec<StoredAttack>> {
        if let Some(site) = query.site.as_deref() {
            self.state.sites.get(site)?;
        }
        self.collaborators.store.attack_logs(query).await
    }

    /// Activity of a site over the last five minutes.
    pub async fn traffic_summary(&self, site: &str) -> Result<TrafficSummary> {
        let config = self.state.sites.get(site)?;
        let range = TimeRange::last(summary_window(), self.clock.now());
        let logs = self.collaborators.store.traffic_logs(site, range).await?;
        let ongoing = self
            .collaborators
            .store
            .attack_logs(AttackQuery::for_site(site).with_status(AttackStatus::Ongoing))
            .await?;
        Ok(summarize(&config, &logs, !ongoing.is_empty()))
    }

    /// Summaries of every registered site, keyed by name.
    pub async fn all_sites_summary(&self) -> BTreeMap<String, SiteSummary> {
        let sites = self.state.sites.list();
        let summaries =
            join_all(sites.iter().map(|config| self.traffic_summary(&config.name))).await;

        sites
            .iter()
            .zip(summaries)
            .map(|(config, summary)| {
                let summary = match summary {
                    Ok(summary) => SiteSummary::Ok(summary),
                    Err(e) => {
                        warn!(site = %config.name, error = %e, "Failed to summarize site");
                        SiteSummary::Error {
                            error: e.to_string(),
                        }
                    }
                };
                (config.name.clone(), summary)
            })
            .collect()
    }

    /// Feed `count` synthetic requests through [`decide`](Self::decide).
    pub async fn simulate_traffic(
        &self,
        site: &str,
        ip: Option<&str>,
        count: usize,
        path: Option<&str>,
    ) -> Result<Vec<Decision>> {
        let mut decisions = Vec::with_capacity(count);
        for _ in 0..count {
            decisions.push(self.decide(site, ip, path).await?);
        }
        Ok(decisions)
    }

    /// A housekeeper over this monitor's state and clock, for manual ticks.
    pub fn housekeeper(&self) -> Housekeeper {
        Housekeeper::new(
            self.state.clone(),
            self.clock.clone(),
            self.settings.attack_horizon,
            self.settings.housekeeping_interval,
        )
    }
}

fn traffic_entry(
    config: &SiteConfig,
    now: DateTime<Utc>,
    ip: Option<&str>,
    country_code: Option<String>,
    path: Option<&str>,
    decision: &Decision,
) -> TrafficLogEntry {
    TrafficLogEntry {
        site: config.name.clone(),
        timestamp: now,
        ip: ip.map(str::to_string),
        country_code,
        path: path.map(str::to_string),
        status: decision.status,
        reason: decision.reason_text(),
    }
}
