use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use objwire_sdk::prelude::*;
use tracing::{debug, info, warn};

use crate::cli::*;
use crate::greeter;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Greet(args) => cmd_greet(config, args).await,
        Command::Demo(args) => cmd_demo(config, args).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            debug!(path = %path.display(), "loading config file");
            SessionConfig::from_toml_str(&text)?
        }
        None => {
            debug!("loading config from environment");
            SessionConfig::from_env()?
        }
    };
    Ok(config)
}

fn build(config: SessionConfig) -> anyhow::Result<ObjWire> {
    Ok(ObjWire::builder()
        .config(config)
        .service(greeter::service()?)
        .build()?)
}

async fn cmd_greet(config: SessionConfig, args: GreetArgs) -> anyhow::Result<()> {
    let partition = config.default_partition;
    let ow = build(config)?;
    let proxy = ow.proxy((greeter::CLASS, partition, args.object_id))?;
    info!(target_id = %proxy.identity(), times = args.times, "greeting");
    for _ in 0..args.times {
        let reply: String = proxy.call_as("greet", args.name.as_str()).await?;
        println!("{}", reply.bold());
    }
    let greeted: i64 = proxy.call_as("stats", ()).await?;
    println!("  {} {} greeted {} times", "✓".green(), proxy.identity().to_string().cyan(), greeted);
    Ok(())
}

async fn cmd_demo(config: SessionConfig, args: DemoArgs) -> anyhow::Result<()> {
    let partition = config.default_partition;
    let ow = build(config)?;
    info!(partition, "running demo");
    if ow.start_auto_commit()? {
        println!("{} auto-commit every {:?}", "•".dimmed(), ow.config().auto_commit_interval);
    }

    let id = ow.scope(|session| {
        let greeter = session.create_object(greeter::CLASS, None)?;
        greeter.set("greeting", args.greeting.as_str())?;
        Ok(greeter.identity().clone())
    })?;
    ow.manager().cleanup_session();
    debug!(object_id = id.object_id, "greeter committed");
    println!("{} created {}", "✓".green(), id.to_string().cyan());

    let proxy = ow.proxy(&id)?;
    let reply: String = proxy.call_as("greet", args.name.as_str()).await?;
    println!("{} remote call: {}", "✓".green(), reply.bold());

    let (greeted, last) = ow.scope(|session| {
        let greeter = session.load_object(greeter::CLASS, &id)?;
        let greeted: i64 = greeter.get_as("greeted")?;
        let last: Option<String> = greeter.get_as("last_name")?;
        Ok((greeted, last))
    })?;
    println!(
        "{} reloaded in partition {}: greeted={} last_name={}",
        "✓".green(),
        partition,
        greeted,
        last.as_deref().unwrap_or("-").yellow()
    );

    let report = ow.shutdown().await;
    info!(
        flushed = report.objects_flushed,
        failures = report.failures.len(),
        "demo finished"
    );
    print_report(&report);
    Ok(())
}

fn print_report(report: &CommitReport) {
    if report.is_success() {
        println!(
            "{} shutdown: {} objects flushed, {} fields written",
            "✓".green().bold(),
            report.objects_flushed,
            report.fields_written
        );
    } else {
        for (identity, failure) in &report.failures {
            warn!(%identity, error = %failure.message, "flush failed");
            println!("{} {}: {}", "✗".red().bold(), identity, failure.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_is_loaded() {
        let config = SessionConfig {
            default_partition: 4,
            ..Default::default()
        };
        let path = std::env::temp_dir().join(format!("objwire-cli-{}.toml", std::process::id()));
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        let loaded = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.default_partition, 4);
    }

    #[test]
    fn missing_config_file_names_the_path() {
        let path = Path::new("/nonexistent/objwire.toml");
        let err = load_config(Some(path)).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/objwire.toml"));
    }

    #[tokio::test]
    async fn greet_and_demo_run_in_process() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let greet = GreetArgs {
            name: "Ada".into(),
            object_id: 3,
            times: 2,
        };
        cmd_greet(SessionConfig::default(), greet).await.unwrap();
        let demo = DemoArgs {
            greeting: "Hi".into(),
            name: "Grace".into(),
        };
        cmd_demo(SessionConfig::default(), demo).await.unwrap();
    }
}
