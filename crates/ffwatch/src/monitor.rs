//! The long-running `watch` loop and the one-shot `status` report.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use ffwatch_core::{Console, Summary};

use crate::cli::{StatusArgs, WatchArgs};
use crate::error::CliError;
use crate::output;

/// Print events until Ctrl-C, then disconnect.
pub async fn watch(console: &Console, args: &WatchArgs) -> Result<(), CliError> {
    let json = args.json;
    // Subscribe before connecting so nothing raised during startup is missed.
    let mut notifications = console.notifier().subscribe();
    let mut connection = console.connection_state();
    let mut alert = console.alert();
    let mut diagnostics = console.diagnostics();

    console.connect().await?;
    if let Some(ref configuration) = args.configuration {
        console.select_configuration(Some(configuration));
    }

    let mut summaries = console.summary_stream();
    let mut last_summary: Option<Summary> = None;
    print_summary(&summaries.borrow_and_update(), &mut last_summary, json);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("interrupted");
                break;
            }
            received = notifications.recv() => match received {
                Ok(notification) => {
                    let line = if json {
                        output::notification_json(&notification)
                    } else {
                        output::notification_line(&notification)
                    };
                    println!("{line}");
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "notifications lagged"),
                Err(RecvError::Closed) => break,
            },
            received = diagnostics.recv() => match received {
                Ok(diagnostic) => {
                    if json {
                        println!("{}", output::diagnostic_json(&diagnostic));
                    } else {
                        eprintln!("{}", output::diagnostic_line(&diagnostic));
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "diagnostics lagged"),
                Err(RecvError::Closed) => break,
            },
            changed = summaries.changed() => {
                if changed.is_err() {
                    break;
                }
                print_summary(&summaries.borrow_and_update(), &mut last_summary, json);
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                let line = if json {
                    output::state_json(state)
                } else {
                    output::state_line(state)
                };
                println!("{line}");
            }
            changed = alert.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = alert.borrow_and_update().clone();
                if let Some(alert) = current {
                    if json {
                        println!("{}", output::alert_json(&alert));
                    } else {
                        eprintln!("{}", output::alert_line(&alert));
                    }
                }
            }
        }
    }

    console.disconnect().await;
    Ok(())
}

/// Summaries are recomputed on every debounced run; only print changes.
fn print_summary(summary: &Summary, last: &mut Option<Summary>, json: bool) {
    if last.as_ref() == Some(summary) {
        return;
    }
    let line = if json {
        output::summary_json(summary)
    } else {
        output::summary_line(summary)
    };
    println!("{line}");
    *last = Some(summary.clone());
}

/// Connect, report the current state once, disconnect.
pub async fn status(console: &Console, args: &StatusArgs) -> Result<(), CliError> {
    console.connect().await?;
    if let Some(ref configuration) = args.configuration {
        console.select_configuration(Some(configuration));
    }
    let summary = console.summary();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", output::summary_line(&summary));
        let mut adapters: Vec<_> = console
            .get_adapters()
            .iter()
            .filter(|a| {
                summary
                    .configuration
                    .as_deref()
                    .is_none_or(|c| c == a.configuration)
            })
            .map(Arc::clone)
            .collect();
        adapters.sort_by(|a, b| a.key().cmp(&b.key()));
        for adapter in &adapters {
            println!("{}", output::adapter_line(adapter));
        }
    }

    console.disconnect().await;
    Ok(())
}
