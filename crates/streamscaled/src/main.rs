//! streamscaled — the streamscale daemon.
//!
//! Loads a scaling config and either checks it or drives a scaling session
//! against an in-memory stream:
//!
//! ```text
//! streamscaled init --stream events --region us-west-2 --output streamscale.toml
//! streamscaled validate --config streamscale.toml
//! streamscaled simulate --config streamscale.toml --shards 4 --load-per-sec 1500
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use streamscale_core::ScalingConfig;

mod simulate;

const DEFAULT_FILTER: &str = "info,streamscale=debug,streamscaled=debug";

#[derive(Parser)]
#[command(name = "streamscaled", about = "streamscale daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config scaffold with placeholder credentials and defaults.
    Init {
        #[arg(long)]
        stream: String,

        #[arg(long, default_value = "us-east-1")]
        region: String,

        /// Destination file. Printed to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a config file and print the effective settings.
    Validate {
        #[command(flatten)]
        source: ConfigSource,

        /// Print the redacted config as JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
    /// Run a scaling session against a simulated stream.
    Simulate {
        #[command(flatten)]
        source: ConfigSource,

        /// Initial number of partitions, spread evenly over the key space.
        #[arg(long, default_value = "4")]
        shards: u32,

        /// Write rate per partition in records per second.
        #[arg(long, default_value = "500")]
        load_per_sec: f64,

        /// Stop after this many minutes. Runs until Ctrl-C when omitted.
        #[arg(long)]
        minutes: Option<u64>,
    },
}

#[derive(Args)]
struct ConfigSource {
    /// Path to the TOML config.
    #[arg(short, long)]
    config: PathBuf,

    /// Override `stream_name`.
    #[arg(long)]
    stream: Option<String>,

    /// Override `region`.
    #[arg(long)]
    region: Option<String>,
}

impl ConfigSource {
    fn load(&self) -> anyhow::Result<ScalingConfig> {
        let mut config = ScalingConfig::from_file(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        if let Some(stream) = &self.stream {
            config.stream_name = stream.clone();
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Init {
            stream,
            region,
            output,
        } => init(&stream, &region, output.as_deref()),
        Command::Validate { source, json } => validate(&source, json),
        Command::Simulate {
            source,
            shards,
            load_per_sec,
            minutes,
        } => {
            let config = source.load()?;
            simulate::run(config, shards, load_per_sec, minutes).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init(stream: &str, region: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let rendered = ScalingConfig::scaffold(stream, region).to_toml_string()?;
    match output {
        Some(path) => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            std::fs::write(path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), stream, "config scaffold written");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn validate(source: &ConfigSource, json: bool) -> anyhow::Result<()> {
    let config = source.load()?;
    let violations = config.violations();
    if !violations.is_empty() {
        for v in &violations {
            eprintln!("  ✗ {v}");
        }
        anyhow::bail!("{} has {} problem(s)", source.config.display(), violations.len());
    }

    let shown = config.redacted();
    if json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
    } else {
        print!("{}", shown.to_toml_string()?);
    }
    info!(stream = %config.stream_name, "config is valid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{body}").unwrap();
        file
    }

    #[test]
    fn parses_simulate_flags() {
        let cli = Cli::try_parse_from([
            "streamscaled", "simulate", "--config", "s.toml", "--shards", "2", "--minutes", "5",
        ])
        .unwrap();
        match cli.command {
            Command::Simulate {
                source,
                shards,
                load_per_sec,
                minutes,
            } => {
                assert_eq!(source.config, PathBuf::from("s.toml"));
                assert_eq!(shards, 2);
                assert_eq!(load_per_sec, 500.0);
                assert_eq!(minutes, Some(5));
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn flags_override_stream_and_region() {
        let rendered = ScalingConfig::scaffold("events", "us-west-2").to_toml_string().unwrap();
        let file = write_config(&rendered);
        let source = ConfigSource {
            config: file.path().to_path_buf(),
            stream: Some("clicks".to_string()),
            region: None,
        };

        let config = source.load().unwrap();
        assert_eq!(config.stream_name, "clicks");
        assert_eq!(config.region, "us-west-2");
    }

    #[test]
    fn validate_fails_on_missing_credentials() {
        let file = write_config("region = \"us-west-2\"\nstream_name = \"events\"\n");
        let source = ConfigSource {
            config: file.path().to_path_buf(),
            stream: None,
            region: None,
        };
        let err = validate(&source, false).unwrap_err();
        assert!(err.to_string().contains("2 problem(s)"));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let file = write_config("");
        assert!(init("events", "us-west-2", Some(file.path())).is_err());
    }
}
