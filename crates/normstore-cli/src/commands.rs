use std::fs;
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use tracing::info;

use normstore_runtime::{StoreConfig, StoreEvent};

use crate::cli::*;
use crate::replay::{Replay, StepReport};
use crate::script::Script;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Replay(args) => cmd_replay(args, config, &cli.format),
        Command::Config(_) => cmd_config(config, &cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StoreConfig> {
    let Some(path) = path else {
        return Ok(StoreConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(StoreConfig::from_toml_str(&text)?)
}

fn cmd_replay(args: ReplayArgs, config: StoreConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.script)
        .with_context(|| format!("reading {}", args.script.display()))?;
    let script = Script::from_json(&text)
        .with_context(|| format!("parsing {}", args.script.display()))?;
    let mut replay = Replay::new(&script, config)?;
    let reports = replay.run(&script.steps)?;

    let records = replay.store().with_effective_source(|source| source.len())?;
    info!(steps = reports.len(), records, "replay finished");

    match format {
        OutputFormat::Json => {
            let mut reports = reports;
            if !args.events {
                reports.iter_mut().for_each(|r| r.events.clear());
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Text => {
            for report in &reports {
                print_report(report, args.events);
            }
            println!(
                "{} {} steps, {} records in store",
                "✓".green().bold(),
                reports.len(),
                records.to_string().bold()
            );
        }
    }
    Ok(())
}

fn print_report(report: &StepReport, show_events: bool) {
    let label = format!("{:>3} {}", report.index, report.step);
    if report.outcome.is_null() {
        println!("{}", label.yellow());
    } else {
        println!("{}  {}", label.yellow(), report.outcome);
    }
    for notification in &report.notifications {
        let marker = if notification.is_missing_data {
            "(missing data)".red().to_string()
        } else {
            String::new()
        };
        println!(
            "      {} {} {}",
            notification.subscription.cyan(),
            notification.data,
            marker
        );
    }
    if show_events {
        for event in &report.events {
            println!("      {}", describe_event(event).dimmed());
        }
    }
}

fn describe_event(event: &StoreEvent) -> String {
    match event {
        StoreEvent::Publish {
            updated,
            invalidated,
            optimistic,
        } => format!(
            "publish: {updated} updated, {invalidated} invalidated{}",
            if *optimistic { " (optimistic)" } else { "" }
        ),
        StoreEvent::NotifyStart {
            epoch,
            invalidate_store,
            ..
        } => format!("notify start: epoch {epoch}, invalidate store {invalidate_store}"),
        StoreEvent::NotifyComplete {
            epoch, affected, ..
        } => format!("notify complete: epoch {epoch}, {} affected", affected.len()),
        StoreEvent::Gc { reachable, removed } => {
            format!("gc: {reachable} reachable, {removed} removed")
        }
        StoreEvent::Snapshot => "snapshot".to_string(),
        StoreEvent::Restore => "restore".to_string(),
        StoreEvent::Lookup {
            data_id,
            is_missing_data,
        } => format!("lookup {data_id}: missing data {is_missing_data}"),
    }
}

fn cmd_config(config: StoreConfig, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use normstore_types::{DataId, Epoch};

    #[test]
    fn missing_config_path_gives_defaults() {
        assert_eq!(load_config(None).unwrap(), StoreConfig::default());
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/normstore.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("reading /nonexistent/normstore.toml"));
    }

    #[test]
    fn events_are_described() {
        assert_eq!(
            describe_event(&StoreEvent::Gc {
                reachable: 3,
                removed: 1
            }),
            "gc: 3 reachable, 1 removed"
        );
        assert_eq!(
            describe_event(&StoreEvent::Lookup {
                data_id: DataId::from("4"),
                is_missing_data: true
            }),
            "lookup 4: missing data true"
        );
        let start = describe_event(&StoreEvent::NotifyStart {
            epoch: Epoch::ZERO.next(),
            invalidate_store: false,
            source_operation: None,
        });
        assert!(start.starts_with("notify start: epoch"));
    }
}
