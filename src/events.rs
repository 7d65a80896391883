//! Event channel from the spider to its host
//!
//! The engine never talks to a transport directly: everything it wants the
//! host to know goes through an injected [`Reporter`].

use crate::models::{Finding, LiveStats, RunStatus};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Severity of a log event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// A vulnerability was reported
    Vuln,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Vuln => write!(f, "vuln"),
        }
    }
}

/// Sink for everything the spider reports while running
pub trait Reporter: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
    /// Percent of known work completed, 0-100
    fn progress(&self, percent: u8);
    /// Running count of reported vulnerabilities
    fn found(&self, count: usize);
    fn status(&self, status: RunStatus);
    fn finding(&self, finding: &Finding);
    fn stats(&self, stats: &LiveStats);
    /// A new run is starting; drop everything shown for the previous one
    fn clear(&self);
}

/// Owned form of a reporter call, for hosts that consume a message stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SpiderEvent {
    Log { message: String, level: LogLevel },
    Progress(u8),
    Found(usize),
    Status(RunStatus),
    Finding(Box<Finding>),
    Stats(LiveStats),
    Clear,
}

/// Forwards every call as a [`SpiderEvent`] over an unbounded channel
#[derive(Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<SpiderEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SpiderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SpiderEvent) {
        // Host went away; the run keeps going and results stay in the session.
        let _ = self.tx.send(event);
    }
}

impl Reporter for ChannelReporter {
    fn log(&self, level: LogLevel, message: &str) {
        self.send(SpiderEvent::Log {
            message: message.to_string(),
            level,
        });
    }

    fn progress(&self, percent: u8) {
        self.send(SpiderEvent::Progress(percent));
    }

    fn found(&self, count: usize) {
        self.send(SpiderEvent::Found(count));
    }

    fn status(&self, status: RunStatus) {
        self.send(SpiderEvent::Status(status));
    }

    fn finding(&self, finding: &Finding) {
        self.send(SpiderEvent::Finding(Box::new(finding.clone())));
    }

    fn stats(&self, stats: &LiveStats) {
        self.send(SpiderEvent::Stats(stats.clone()));
    }

    fn clear(&self) {
        self.send(SpiderEvent::Clear);
    }
}

/// Discards everything
pub struct NullReporter;

impl Reporter for NullReporter {
    fn log(&self, _level: LogLevel, _message: &str) {}
    fn progress(&self, _percent: u8) {}
    fn found(&self, _count: usize) {}
    fn status(&self, _status: RunStatus) {}
    fn finding(&self, _finding: &Finding) {}
    fn stats(&self, _stats: &LiveStats) {}
    fn clear(&self) {}
}

/// Terminal reporter: tracing for log lines, a progress bar, colored findings
pub struct ConsoleReporter {
    pb: ProgressBar,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.cyan} [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { pb }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ConsoleReporter {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
            LogLevel::Vuln => warn!("[VULN] {message}"),
        }
    }

    fn progress(&self, percent: u8) {
        self.pb.set_position(u64::from(percent.min(100)));
    }

    fn found(&self, count: usize) {
        self.pb.set_message(format!("{count} found"));
    }

    fn status(&self, status: RunStatus) {
        match status {
            RunStatus::Running => self.pb.set_message("running"),
            RunStatus::Idle => self.pb.finish_with_message("crawl complete"),
            RunStatus::Stopped => self.pb.abandon_with_message("stopped"),
        }
    }

    fn finding(&self, finding: &Finding) {
        let line = format!(
            "  {} {} {} [{}]",
            format!("[{}]", finding.severity).red().bold(),
            finding.title.bold(),
            finding.endpoint.cyan(),
            finding.status.to_string().yellow()
        );
        self.pb.println(line);
    }

    fn stats(&self, stats: &LiveStats) {
        self.pb.set_message(format!(
            "urls {} | params {} | payloads {} | avg {}ms",
            stats.urls_crawled, stats.params_fuzzed, stats.payloads_tested, stats.avg_resp_time_ms
        ));
    }

    fn clear(&self) {
        self.pb.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_reporter_forwards_in_order() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.clear();
        reporter.status(RunStatus::Running);
        reporter.log(LogLevel::Warn, "queue full");
        reporter.progress(40);
        drop(reporter);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], SpiderEvent::Clear));
        assert!(matches!(events[1], SpiderEvent::Status(RunStatus::Running)));
        assert!(matches!(
            &events[2],
            SpiderEvent::Log { level: LogLevel::Warn, message } if message == "queue full"
        ));
        assert!(matches!(events[3], SpiderEvent::Progress(40)));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.found(3);
    }
}
