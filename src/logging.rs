//! # Structured Logging Module
//!
//! Environment-aware structured logging. Console output always; a JSON log file when
//! `LoggingConfig::log_dir` is set.

use crate::config::LoggingConfig;
use crate::error::{Result, TaskerFlowError};
use chrono::Utc;
use std::fs;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber. If another
/// global subscriber is already set the existing one is kept.
pub fn init_structured_logging(config: &LoggingConfig) -> Result<()> {
    let environment = get_environment();
    let directive = resolve_directive(config, &environment);

    EnvFilter::try_new(&directive)
        .map_err(|e| TaskerFlowError::LoggingError(format!("Invalid filter '{directive}': {e}")))?;

    if LOGGER_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let mut log_file = None;
    let (file_layer, guard) = match &config.log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir).map_err(|e| {
                TaskerFlowError::LoggingError(format!(
                    "Failed to create log directory {}: {e}",
                    log_dir.display()
                ))
            })?;

            let pid = process::id();
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let file_name = format!("{environment}.{pid}.{timestamp}.log");
            log_file = Some(log_dir.join(&file_name));

            let appender = tracing_appender::rolling::never(log_dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(&directive));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = if config.json {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .with_filter(EnvFilter::new(&directive))
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(&directive))
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    // Keep the file writer alive for the life of the process
    let _ = LOGGER_INITIALIZED.set(guard);

    if installed {
        tracing::info!(
            pid = process::id(),
            environment = %environment,
            filter = %directive,
            log_file = ?log_file,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    } else {
        tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
    }

    Ok(())
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("TASKER_FLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn resolve_directive(config: &LoggingConfig, environment: &str) -> String {
    config
        .level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| get_log_level(environment).to_string())
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    task_id: &str,
    task_name: Option<&str>,
    status: &str,
    attempts: Option<u32>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        task_name = task_name,
        status = %status,
        attempts = attempts,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log structured data for queue operations
pub fn log_queue_operation(
    operation: &str,
    queue: &str,
    task_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        queue = %queue,
        task_id = task_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📥 QUEUE_OPERATION"
    );
}

/// Log structured data for workflow operations
pub fn log_workflow_operation(
    operation: &str,
    workflow_id: &str,
    step_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        workflow_id = %workflow_id,
        step_id = step_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔀 WORKFLOW_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
