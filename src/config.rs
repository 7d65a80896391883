//! Configuration management for the spider
//!
//! A TOML file with `[spider]`, `[detection]`, `[http]` and `[tuning]`
//! sections is merged over [`SpiderOptions::default`]; CLI flags are then
//! overlaid with [`merge_cli_args`].

use crate::error::{Result, SpiderError};
use crate::models::{DetectionTuning, SpiderOptions};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// File-based configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    spider: Option<SpiderSection>,
    detection: Option<DetectionSection>,
    http: Option<HttpSection>,
    tuning: Option<DetectionTuning>,
}

#[derive(Debug, Deserialize)]
struct SpiderSection {
    url: Option<String>,
    depth: Option<u32>,
    threads: Option<usize>,
    max_queue_size: Option<usize>,
    same_domain: Option<bool>,
    follow_forms: Option<bool>,
    delay_ms: Option<u64>,
    payload_set: Option<String>,
    render: Option<bool>,
    render_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DetectionSection {
    error_based: Option<bool>,
    boolean_based: Option<bool>,
    time_based: Option<bool>,
    union_based: Option<bool>,
    advanced_mode: Option<bool>,
    mutate_payloads: Option<bool>,
    mutation_seed: Option<u64>,
    waf_detection: Option<bool>,
    blind_extraction: Option<bool>,
    header_checks: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct HttpSection {
    timeout_ms: Option<u64>,
    user_agent: Option<String>,
    proxy: Option<String>,
    rate_limit: Option<u32>,
    headers: Option<HashMap<String, String>>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

/// Loads configuration from a TOML file and merges with defaults
pub fn load_config(path: &Path) -> Result<SpiderOptions> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses TOML configuration text over the defaults
pub fn parse_config(content: &str) -> Result<SpiderOptions> {
    let file_config: FileConfig = toml::from_str(content)?;
    let mut options = SpiderOptions::default();

    if let Some(spider) = file_config.spider {
        set(&mut options.url, spider.url);
        set(&mut options.depth, spider.depth);
        set(&mut options.threads, spider.threads);
        set(&mut options.max_queue_size, spider.max_queue_size);
        set(&mut options.same_domain, spider.same_domain);
        set(&mut options.follow_forms, spider.follow_forms);
        set(&mut options.delay_ms, spider.delay_ms);
        set(&mut options.payload_set, spider.payload_set);
        set(&mut options.render, spider.render);
        set(&mut options.render_wait_ms, spider.render_wait_ms);
    }

    if let Some(detection) = file_config.detection {
        set(&mut options.error_based, detection.error_based);
        set(&mut options.boolean_based, detection.boolean_based);
        set(&mut options.time_based, detection.time_based);
        set(&mut options.union_based, detection.union_based);
        set(&mut options.advanced_mode, detection.advanced_mode);
        set(&mut options.mutate_payloads, detection.mutate_payloads);
        set(&mut options.waf_detection, detection.waf_detection);
        set(&mut options.blind_extraction, detection.blind_extraction);
        set(&mut options.header_checks, detection.header_checks);
        if detection.mutation_seed.is_some() {
            options.mutation_seed = detection.mutation_seed;
        }
    }

    if let Some(http) = file_config.http {
        set(&mut options.timeout_ms, http.timeout_ms);
        set(&mut options.user_agent, http.user_agent);
        if http.proxy.is_some() {
            options.proxy = http.proxy;
        }
        if http.rate_limit.is_some() {
            options.rate_limit = http.rate_limit;
        }
        if let Some(headers) = http.headers {
            options.headers.extend(headers);
        }
    }

    if let Some(tuning) = file_config.tuning {
        options.tuning = tuning;
    }

    validate(&options)?;
    Ok(options)
}

/// CLI flags that override file configuration; `None`/`false` leaves the value alone
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub url: Option<String>,
    pub depth: Option<u32>,
    pub threads: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub payload_set: Option<String>,
    pub no_error: bool,
    pub no_boolean: bool,
    pub no_time: bool,
    pub no_union: bool,
    pub no_advanced: bool,
    pub any_domain: bool,
    pub no_forms: bool,
    pub no_mutation: bool,
    pub seed: Option<u64>,
    pub blind: bool,
    pub check_headers: bool,
    pub proxy: Option<String>,
    pub rate_limit: Option<u32>,
    pub delay_ms: Option<u64>,
    pub headers: Option<Vec<String>>,
    pub render: bool,
    pub render_wait_ms: Option<u64>,
}

/// Merges CLI arguments into existing options
pub fn merge_cli_args(options: &mut SpiderOptions, cli: CliOverrides) -> Result<()> {
    set(&mut options.url, cli.url);
    set(&mut options.depth, cli.depth);
    set(&mut options.threads, cli.threads);
    set(&mut options.timeout_ms, cli.timeout_ms);
    set(&mut options.payload_set, cli.payload_set);
    set(&mut options.delay_ms, cli.delay_ms);
    set(&mut options.render_wait_ms, cli.render_wait_ms);

    if cli.no_error {
        options.error_based = false;
    }
    if cli.no_boolean {
        options.boolean_based = false;
    }
    if cli.no_time {
        options.time_based = false;
    }
    if cli.no_union {
        options.union_based = false;
    }
    if cli.no_advanced {
        options.advanced_mode = false;
    }
    if cli.any_domain {
        options.same_domain = false;
    }
    if cli.no_forms {
        options.follow_forms = false;
    }
    if cli.no_mutation {
        options.mutate_payloads = false;
    }
    if cli.seed.is_some() {
        options.mutation_seed = cli.seed;
    }
    if cli.blind {
        options.blind_extraction = true;
    }
    if cli.check_headers {
        options.header_checks = true;
    }
    if cli.render {
        options.render = true;
    }
    if cli.proxy.is_some() {
        options.proxy = cli.proxy;
    }
    if cli.rate_limit.is_some() {
        options.rate_limit = cli.rate_limit;
    }
    if let Some(headers) = cli.headers {
        for header in headers {
            if let Some((key, value)) = header.split_once(':') {
                options
                    .headers
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    validate(options)
}

fn validate(options: &SpiderOptions) -> Result<()> {
    if options.threads == 0 {
        return Err(SpiderError::ConfigError("threads must be at least 1".to_string()));
    }
    if options.timeout_ms == 0 {
        return Err(SpiderError::ConfigError("timeout must be positive".to_string()));
    }
    if options.max_queue_size == 0 {
        return Err(SpiderError::ConfigError("max_queue_size must be at least 1".to_string()));
    }
    let t = &options.tuning;
    if !(0.0..=1.0).contains(&t.diff_tolerance) || !(0.0..=1.0).contains(&t.pair_tolerance) {
        return Err(SpiderError::ConfigError(
            "tolerances must be between 0.0 and 1.0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let options = parse_config("").expect("parse");
        assert_eq!(options.depth, 3);
        assert_eq!(options.threads, 3);
        assert_eq!(options.timeout_ms, 20_000);
        assert!(options.advanced_mode);
        assert!(!options.blind_extraction);
    }

    #[test]
    fn test_sections_override_defaults() {
        let toml = r#"
            [spider]
            depth = 1
            threads = 5

            [detection]
            time_based = false
            mutation_seed = 42

            [http]
            timeout_ms = 5000
            headers = { "X-Api-Key" = "secret" }

            [tuning]
            diff_tolerance = 0.2
        "#;
        let options = parse_config(toml).expect("parse");
        assert_eq!(options.depth, 1);
        assert_eq!(options.threads, 5);
        assert!(!options.time_based);
        assert!(options.error_based);
        assert_eq!(options.mutation_seed, Some(42));
        assert_eq!(options.timeout_ms, 5000);
        assert_eq!(options.headers.get("X-Api-Key").map(String::as_str), Some("secret"));
        assert_eq!(options.tuning.diff_tolerance, 0.2);
        // Unset tuning keys keep their defaults
        assert_eq!(options.tuning.length_floor, 30);
    }

    #[test]
    fn test_example_config_parses() {
        let options = parse_config(include_str!("../sqlspider.example.toml")).expect("example config");
        assert_eq!(options.depth, 2);
        assert!(options.headers.is_empty());
        assert!(options.proxy.is_none());
        assert_eq!(options.tuning.time_delay_threshold_ms, 4000);
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(matches!(
            parse_config("[scan]\nthreads = 2"),
            Err(SpiderError::TomlError(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            parse_config("[spider]\nthreads = 0"),
            Err(SpiderError::ConfigError(_))
        ));
        assert!(matches!(
            parse_config("[tuning]\npair_tolerance = 1.5"),
            Err(SpiderError::ConfigError(_))
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let mut options = SpiderOptions::default();
        merge_cli_args(
            &mut options,
            CliOverrides {
                url: Some("http://shop.test/".to_string()),
                depth: Some(1),
                no_union: true,
                any_domain: true,
                seed: Some(7),
                headers: Some(vec!["Authorization: Bearer abc".to_string(), "bogus".to_string()]),
                ..CliOverrides::default()
            },
        )
        .expect("merge");
        assert_eq!(options.url, "http://shop.test/");
        assert_eq!(options.depth, 1);
        assert!(!options.union_based);
        assert!(options.boolean_based);
        assert!(!options.same_domain);
        assert_eq!(options.mutation_seed, Some(7));
        assert_eq!(options.headers.len(), 1);
        assert_eq!(
            options.headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
    }
}
