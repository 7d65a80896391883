//! SQLi Spider CLI

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing_subscriber::EnvFilter;

use sqlspider::config::{self, CliOverrides};
use sqlspider::events::ConsoleReporter;
use sqlspider::models::{Finding, FindingDetail, ScanResult, Severity, SpiderOptions};
use sqlspider::report;
use sqlspider::scanner::payloads::PayloadStore;
use sqlspider::Spider;

/// SQLi Spider - crawls a site and confirms SQL injection in its parameters
#[derive(Parser)]
#[command(name = "sqlspider", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Crawl a target and test every discovered parameter
    Scan {
        /// Seed URL
        #[arg(short, long)]
        url: Option<String>,

        /// Maximum link depth from the seed
        #[arg(short, long)]
        depth: Option<u32>,

        /// Concurrent page workers
        #[arg(long)]
        threads: Option<usize>,

        /// Request timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Payload file, or "default" for the built-in set
        #[arg(long)]
        payloads: Option<String>,

        /// Disable error-based detection
        #[arg(long)]
        no_error: bool,

        /// Disable boolean-based detection
        #[arg(long)]
        no_boolean: bool,

        /// Disable time-based detection
        #[arg(long)]
        no_time: bool,

        /// Disable UNION-based extraction
        #[arg(long)]
        no_union: bool,

        /// Stop at the first confirming technique instead of stacking evidence
        #[arg(long)]
        no_advanced: bool,

        /// Follow links to other origins
        #[arg(long)]
        any_domain: bool,

        /// Do not test HTML forms
        #[arg(long)]
        no_forms: bool,

        /// Send payloads exactly as listed
        #[arg(long)]
        no_mutation: bool,

        /// Seed for reproducible payload mutation
        #[arg(long)]
        seed: Option<u64>,

        /// Extract the DBMS version through the boolean oracle when UNION fails
        #[arg(long)]
        blind: bool,

        /// Report missing Content-Security-Policy / X-Frame-Options headers
        #[arg(long)]
        check_headers: bool,

        /// Throttle between crawl dispatches in milliseconds
        #[arg(long)]
        delay: Option<u64>,

        /// Max requests per second
        #[arg(long)]
        rate_limit: Option<u32>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write findings as JSON Lines
        #[arg(long)]
        jsonl: Option<PathBuf>,

        /// Custom headers (format: "Key: Value")
        #[arg(short = 'H', long)]
        header: Option<Vec<String>>,

        /// HTTP/HTTPS proxy URL
        #[arg(long)]
        proxy: Option<String>,

        /// Render pages in headless Chromium (requires the browser feature)
        #[arg(long)]
        render: bool,

        /// Wait time in ms after page load when rendering
        #[arg(long)]
        render_wait: Option<u64>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show per-category payload counts
    Payloads {
        /// Payload file, or "default" for the built-in set
        #[arg(long, default_value = "default")]
        set: String,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "sqlspider=debug" } else { "sqlspider=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

fn print_banner() {
    let banner = r#"
    +---------------------------------------+
    |  SQLi Spider v0.1.0                   |
    |  crawl / probe / confirm              |
    +---------------------------------------+
    "#;
    println!("{}", banner.cyan());
}

fn technique_summary(finding: &Finding) -> (String, String, String) {
    match &finding.detail {
        FindingDetail::SqlInjection(d) => (
            d.parameter.clone(),
            d.techniques
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            d.dbms.to_string(),
        ),
        FindingDetail::MissingProtection { header } => (header.clone(), "-".to_string(), "-".to_string()),
    }
}

fn print_summary(result: &ScanResult) {
    println!("\n{}", "  Crawl Summary".bold());
    println!("  {}", "-".repeat(35));
    println!(
        "  {} {}  {} {}  {} {}",
        "URLs:".bold(),
        result.urls_visited,
        "Params:".bold(),
        result.stats.params_fuzzed,
        "Requests:".bold(),
        result.total_requests
    );

    if !result.findings.is_empty() {
        let mut builder = Builder::default();
        builder.push_record(["Severity", "Status", "Parameter", "Techniques", "DBMS", "Endpoint"]);
        for finding in &result.findings {
            let (parameter, techniques, dbms) = technique_summary(finding);
            builder.push_record([
                finding.severity.to_string(),
                finding.status.to_string(),
                parameter,
                techniques,
                dbms,
                finding.endpoint.clone(),
            ]);
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        println!("{table}");
    }

    let critical = result.count_by_severity(Severity::Critical);
    let low = result.count_by_severity(Severity::Low);
    println!(
        "\n  {} {}  ({})",
        format!("{critical} SQL injection").red().bold(),
        format!("{low} missing protection").blue(),
        result.status.to_string().yellow()
    );
}

async fn run_scan(
    options: SpiderOptions,
    output: Option<PathBuf>,
    jsonl: Option<PathBuf>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("  {} {}", "Target:".bold(), options.url.green());
    println!(
        "  {} {}  {} {}",
        "Depth:".bold(),
        options.depth.to_string().cyan(),
        "Threads:".bold(),
        options.threads.to_string().cyan()
    );
    println!("  {}\n", "Press Ctrl+C to stop.".yellow());

    let spider = Arc::new(Spider::new(Arc::new(ConsoleReporter::new())));
    let handle = spider.start(options)?;

    let stopper = Arc::clone(&spider);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let result = handle.await?;
    ctrl_c.abort();

    print_summary(&result);

    if let Some(path) = output {
        report::json::export(&result, &path)?;
        println!("\n  {} {}", "Report saved to:".bold(), path.display().to_string().green());
    }
    if let Some(path) = jsonl {
        report::jsonl::export(&result, &path)?;
        println!("  {} {}", "Findings saved to:".bold(), path.display().to_string().green());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            url,
            depth,
            threads,
            timeout,
            payloads,
            no_error,
            no_boolean,
            no_time,
            no_union,
            no_advanced,
            any_domain,
            no_forms,
            no_mutation,
            seed,
            blind,
            check_headers,
            delay,
            rate_limit,
            config: config_path,
            output,
            jsonl,
            header,
            proxy,
            render,
            render_wait,
            verbose,
        } => {
            init_tracing(verbose);
            print_banner();

            let mut options = if let Some(ref path) = config_path {
                config::load_config(path)?
            } else {
                let default_path = Path::new("sqlspider.toml");
                if default_path.exists() {
                    config::load_config(default_path)?
                } else {
                    SpiderOptions::default()
                }
            };

            config::merge_cli_args(
                &mut options,
                CliOverrides {
                    url,
                    depth,
                    threads,
                    timeout_ms: timeout,
                    payload_set: payloads,
                    no_error,
                    no_boolean,
                    no_time,
                    no_union,
                    no_advanced,
                    any_domain,
                    no_forms,
                    no_mutation,
                    seed,
                    blind,
                    check_headers,
                    proxy,
                    rate_limit,
                    delay_ms: delay,
                    headers: header,
                    render,
                    render_wait_ms: render_wait,
                },
            )?;

            if options.url.is_empty() {
                eprintln!("  {} --url is required (or [spider] url in the config)", "Error:".red().bold());
                std::process::exit(2);
            }

            run_scan(options, output, jsonl).await?;
        }

        Commands::Payloads { set } => {
            init_tracing(false);
            print_banner();

            let store = PayloadStore::load(&set)?;
            let mut builder = Builder::default();
            builder.push_record(["Category", "Payloads"]);
            let mut total = 0;
            for (category, count) in store.counts() {
                total += count;
                builder.push_record([category.as_str().to_string(), count.to_string()]);
            }
            builder.push_record(["Total".to_string(), total.to_string()]);
            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{table}");
        }
    }

    Ok(())
}
