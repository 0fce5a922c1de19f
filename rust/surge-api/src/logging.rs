//! Structured logging setup and helpers.
//!
//! [`init_tracing`] installs the global subscriber. [`OpTimer`] and the
//! `log_*` macros give startup steps, resyncs and sync runs a uniform shape
//! in the logs.

use std::time::Instant;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set. Calling this twice is a no-op.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Operation timer for measuring and logging execution duration.
///
/// ```rust,ignore
/// use surge_api::logging::OpTimer;
///
/// let timer = OpTimer::new("sync", "fetch_surge_alerts");
/// // ... walk the pages ...
/// timer.finish();
/// ```
#[derive(Debug)]
pub struct OpTimer {
    /// Component being timed (e.g. "scheduler", "database").
    component: String,
    /// Operation being performed (e.g. "resync", "open").
    operation: String,
    start: Instant,
}

impl OpTimer {
    /// Start timing and log the start at debug level.
    #[must_use]
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        let component = component.into();
        let operation = operation.into();

        tracing::debug!(
            component = %component,
            operation = %operation,
            "Operation started"
        );

        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Log completion with `duration_ms`.
    pub fn finish(self) {
        let duration_ms = self.start.elapsed().as_millis();

        tracing::info!(
            component = %self.component,
            operation = %self.operation,
            duration_ms = duration_ms,
            "Operation completed"
        );
    }

    /// Log completion or failure depending on `result`.
    ///
    /// ```rust,ignore
    /// let timer = OpTimer::new("database", "touch_api_status");
    /// let result = db.touch_api_status("surge_alerts", Utc::now()).await;
    /// timer.finish_with_result(result.as_ref());
    /// ```
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) {
        let duration_ms = self.start.elapsed().as_millis();

        match result {
            Ok(_) => {
                tracing::info!(
                    component = %self.component,
                    operation = %self.operation,
                    duration_ms = duration_ms,
                    "Operation completed successfully"
                );
            }
            Err(e) => {
                tracing::error!(
                    component = %self.component,
                    operation = %self.operation,
                    duration_ms = duration_ms,
                    error = %e,
                    "Operation failed"
                );
            }
        }
    }
}

/// Log a numbered startup step.
///
/// ```rust,ignore
/// log_init_step!(1, 4, "Database", "data/surge.sqlite");
/// ```
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(
            step = $step,
            total = $total,
            "[{}/{}] {} - {}",
            $step,
            $total,
            $name,
            $detail
        );
    };
    ($step:expr, $total:expr, $name:expr) => {
        tracing::info!(step = $step, total = $total, "[{}/{}] {}", $step, $total, $name);
    };
}

/// Log a startup warning.
#[macro_export]
macro_rules! log_init_warning {
    ($msg:expr) => {
        tracing::warn!("⚠️  {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::warn!("⚠️  {}", format!($msg, $($arg)*));
    };
}

/// Log the startup banner.
#[macro_export]
macro_rules! log_banner {
    ($title:expr) => {
        tracing::info!("═══════════════════════════════════════════════════");
        tracing::info!("  {}", $title);
        tracing::info!("═══════════════════════════════════════════════════");
    };
    ($title:expr, $subtitle:expr) => {
        tracing::info!("═══════════════════════════════════════════════════");
        tracing::info!("  {}", $title);
        tracing::info!("  {}", $subtitle);
        tracing::info!("═══════════════════════════════════════════════════");
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_timer_creation() {
        let timer = OpTimer::new("scheduler", "resync");
        assert_eq!(timer.component, "scheduler");
        assert_eq!(timer.operation, "resync");
    }

    #[test]
    fn test_op_timer_finish_with_result() {
        let ok: Result<u64, String> = Ok(3);
        OpTimer::new("sync", "run").finish_with_result(ok.as_ref());

        let err: Result<u64, String> = Err("HTTP 502".to_string());
        OpTimer::new("sync", "run").finish_with_result(err.as_ref());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("debug", false);
        init_tracing("info", true);
    }
}
