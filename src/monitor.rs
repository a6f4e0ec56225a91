//! # Error Monitor
//!
//! Periodic inspection of the interceptor's aggregated statistics:
//! scheduled reports, threshold alerts and trend analysis, plus an
//! on-demand per-module breakdown.
//!
//! The report and trend cadences run as independent interval tasks so a
//! slow report never delays the next trend pass, and a failed tick is
//! logged without stopping the schedule.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::interceptor::{ErrorInterceptor, ModuleStatsSnapshot, OverallStatsSnapshot};
use crate::types::Result;

/// Thresholds and cadences for the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorConfig {
    /// Cadence of the statistics report
    pub report_interval: Duration,
    /// Cadence of the trend analysis (longer period)
    pub trend_interval: Duration,
    /// Alert when the overall error count reaches this
    pub total_error_threshold: u64,
    /// Alert when one module's critical count reaches this
    pub critical_error_threshold: u64,
    /// Alert when a module's error rate reaches this
    pub error_rate_threshold: f64,
    /// Minimum module errors before the rate is considered meaningful
    pub min_errors_for_rate: u64,
    /// How many modules the trend report ranks
    pub trend_top_modules: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(300),
            trend_interval: Duration::from_secs(3600),
            total_error_threshold: 50,
            critical_error_threshold: 10,
            error_rate_threshold: 0.10,
            min_errors_for_rate: 20,
            trend_top_modules: 3,
        }
    }
}

impl TryFrom<config::Config> for MonitorConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = MonitorConfig::default();

        if let Ok(secs) = cfg.get::<u64>("monitor.report_interval_secs") {
            base.report_interval = Duration::from_secs(secs);
        }
        if let Ok(secs) = cfg.get::<u64>("monitor.trend_interval_secs") {
            base.trend_interval = Duration::from_secs(secs);
        }
        if let Ok(threshold) = cfg.get::<u64>("monitor.total_error_threshold") {
            base.total_error_threshold = threshold;
        }
        if let Ok(threshold) = cfg.get::<u64>("monitor.critical_error_threshold") {
            base.critical_error_threshold = threshold;
        }
        if let Ok(threshold) = cfg.get::<f64>("monitor.error_rate_threshold") {
            base.error_rate_threshold = threshold;
        }
        if let Ok(min) = cfg.get::<u64>("monitor.min_errors_for_rate") {
            base.min_errors_for_rate = min;
        }
        if let Ok(top) = cfg.get::<usize>("monitor.trend_top_modules") {
            base.trend_top_modules = top;
        }

        Ok(base)
    }
}

/// A threshold crossing worth an operator's attention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ThresholdAlert {
    TotalErrors {
        total: u64,
        threshold: u64,
    },
    ModuleCritical {
        module_id: String,
        critical: u64,
        threshold: u64,
    },
    ModuleErrorRate {
        module_id: String,
        rate: f64,
        threshold: f64,
    },
}

/// On-demand phase breakdown for one module. Percentages of a zero total
/// are 0, never a division error.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleErrorAnalysis {
    pub module_id: String,
    pub total_errors: u64,
    pub input_validation_pct: f64,
    pub business_logic_pct: f64,
    pub database_pct: f64,
    pub external_api_pct: f64,
    pub system_pct: f64,
    pub critical_pct: f64,
    pub recovered_errors: u64,
}

/// Periodically inspects interceptor statistics and raises alerts.
pub struct ErrorMonitor {
    interceptor: Arc<ErrorInterceptor>,
    config: MonitorConfig,
}

/// Handle to the spawned monitor tasks.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    report_task: JoinHandle<()>,
    trend_task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stops both schedules and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.report_task.await;
        let _ = self.trend_task.await;
    }
}

impl ErrorMonitor {
    pub fn new(interceptor: Arc<ErrorInterceptor>, config: MonitorConfig) -> Self {
        Self {
            interceptor,
            config,
        }
    }

    /// Starts the report and trend schedules on background tasks.
    pub fn spawn(self) -> MonitorHandle {
        let monitor = Arc::new(self);
        let (shutdown, rx) = watch::channel(false);

        let report_task = {
            let monitor = Arc::clone(&monitor);
            let mut rx = rx.clone();
            tokio::spawn(async move {
                let mut ticker = delayed_interval(monitor.config.report_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = monitor.generate_error_report() {
                                error!(error = %e, "Error report generation failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            })
        };

        let trend_task = {
            let monitor = Arc::clone(&monitor);
            let mut rx = rx;
            tokio::spawn(async move {
                let mut ticker = delayed_interval(monitor.config.trend_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = monitor.analyze_error_trends() {
                                error!(error = %e, "Trend analysis failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            })
        };

        MonitorHandle {
            shutdown,
            report_task,
            trend_task,
        }
    }

    /// One report pass: summary, per-module detail, threshold alerts.
    pub fn generate_error_report(&self) -> Result<()> {
        let overall = self.interceptor.overall_stats();

        if overall.total_errors == 0 {
            info!("Error report: no errors, all modules healthy");
            return Ok(());
        }

        info!(
            total_errors = %overall.total_errors,
            total_recovered = %overall.total_recovered,
            active_modules = %overall.module_count,
            "Error report"
        );

        for (module_id, stats) in &overall.modules {
            if stats.total_errors == 0 {
                continue;
            }
            info!(
                module_id = %module_id,
                total = %stats.total_errors,
                input_validation = %stats.input_validation_errors,
                business_logic = %stats.business_logic_errors,
                database = %stats.database_errors,
                external_api = %stats.external_api_errors,
                system = %stats.system_errors,
                critical = %stats.critical_errors,
                recovered = %stats.recovered_errors,
                "Module error detail"
            );
        }

        for alert in self.evaluate_thresholds(&overall) {
            self.send_alert(&alert);
        }

        Ok(())
    }

    /// Evaluates all thresholds against a statistics snapshot.
    pub fn evaluate_thresholds(&self, overall: &OverallStatsSnapshot) -> Vec<ThresholdAlert> {
        let mut alerts = Vec::new();

        if overall.total_errors >= self.config.total_error_threshold {
            alerts.push(ThresholdAlert::TotalErrors {
                total: overall.total_errors,
                threshold: self.config.total_error_threshold,
            });
        }

        for (module_id, stats) in &overall.modules {
            if stats.critical_errors >= self.config.critical_error_threshold {
                alerts.push(ThresholdAlert::ModuleCritical {
                    module_id: module_id.clone(),
                    critical: stats.critical_errors,
                    threshold: self.config.critical_error_threshold,
                });
            }

            if stats.total_errors >= self.config.min_errors_for_rate {
                let rate = stats.total_errors as f64
                    / (stats.total_errors + stats.recovered_errors) as f64;
                if rate >= self.config.error_rate_threshold {
                    alerts.push(ThresholdAlert::ModuleErrorRate {
                        module_id: module_id.clone(),
                        rate,
                        threshold: self.config.error_rate_threshold,
                    });
                }
            }
        }

        alerts
    }

    /// One trend pass: rank the noisiest modules.
    pub fn analyze_error_trends(&self) -> Result<()> {
        let overall = self.interceptor.overall_stats();
        let top = top_modules(&overall, self.config.trend_top_modules);

        if top.is_empty() {
            info!("Trend analysis: no module errors recorded");
            return Ok(());
        }

        for (rank, (module_id, total)) in top.iter().enumerate() {
            info!(
                rank = %(rank + 1),
                module_id = %module_id,
                total_errors = %total,
                "Top error module"
            );
        }

        Ok(())
    }

    /// Detailed phase breakdown for one module.
    pub fn analyze_module_errors(&self, module_id: &str) -> ModuleErrorAnalysis {
        let stats = self.interceptor.module_stats(module_id);
        let analysis = analyze_stats(module_id, &stats);

        info!(
            module_id = %module_id,
            total = %analysis.total_errors,
            input_validation_pct = %analysis.input_validation_pct,
            business_logic_pct = %analysis.business_logic_pct,
            database_pct = %analysis.database_pct,
            external_api_pct = %analysis.external_api_pct,
            system_pct = %analysis.system_pct,
            critical_pct = %analysis.critical_pct,
            recovered = %analysis.recovered_errors,
            "Module error analysis"
        );

        analysis
    }

    /// Logs the final totals for an operator-driven rollover. Does NOT
    /// reset: call [`ErrorInterceptor::reset_stats`] explicitly after
    /// archiving, since resetting without archiving loses history.
    pub fn rollover_report(&self) {
        let overall = self.interceptor.overall_stats();
        info!(
            total_errors = %overall.total_errors,
            total_recovered = %overall.total_recovered,
            active_modules = %overall.module_count,
            "Rollover: final statistics before reset"
        );
    }

    fn send_alert(&self, alert: &ThresholdAlert) {
        counter!("module.alerts.threshold", 1);
        match alert {
            ThresholdAlert::TotalErrors { total, threshold } => warn!(
                total = %total,
                threshold = %threshold,
                alert = true,
                "ALERT: overall error count over threshold"
            ),
            ThresholdAlert::ModuleCritical {
                module_id,
                critical,
                threshold,
            } => warn!(
                module_id = %module_id,
                critical = %critical,
                threshold = %threshold,
                alert = true,
                "ALERT: module critical errors over threshold"
            ),
            ThresholdAlert::ModuleErrorRate {
                module_id,
                rate,
                threshold,
            } => warn!(
                module_id = %module_id,
                rate = %format!("{:.1}%", rate * 100.0),
                threshold = %format!("{:.1}%", threshold * 100.0),
                alert = true,
                "ALERT: module error rate over threshold"
            ),
        }
    }
}

/// A ticker whose first tick fires one full period after creation, so
/// spawning the monitor never emits a report at startup.
fn delayed_interval(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Modules ranked by total error count, descending, errors only.
pub fn top_modules(overall: &OverallStatsSnapshot, limit: usize) -> Vec<(String, u64)> {
    let mut ranked: Vec<(String, u64)> = overall
        .modules
        .iter()
        .filter(|(_, stats)| stats.total_errors > 0)
        .map(|(id, stats)| (id.clone(), stats.total_errors))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(limit);
    ranked
}

fn analyze_stats(module_id: &str, stats: &ModuleStatsSnapshot) -> ModuleErrorAnalysis {
    let total = stats.total_errors;
    ModuleErrorAnalysis {
        module_id: module_id.to_string(),
        total_errors: total,
        input_validation_pct: percentage(stats.input_validation_errors, total),
        business_logic_pct: percentage(stats.business_logic_errors, total),
        database_pct: percentage(stats.database_errors, total),
        external_api_pct: percentage(stats.external_api_errors, total),
        system_pct: percentage(stats.system_errors, total),
        critical_pct: percentage(stats.critical_errors, total),
        recovered_errors: stats.recovered_errors,
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 * 100.0) / total as f64
    }
}
