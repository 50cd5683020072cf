//! Request path filtering.
//!
//! The ignore check runs on the raw path and wins over everything else: an
//! ignored path is never reported. Paths that are not ignored are reduced
//! according to the configured [`UriReportingLevel`].

use percent_encoding::percent_decode_str;
use scout_core::{ScoutConfig, UriReportingLevel};

/// Tag name under which the filtered path is reported.
pub const PATH_TAG: &str = "path";

/// Replacement for the value of a sensitive query parameter.
pub const FILTERED_MARKER: &str = "[FILTERED]";

/// Query parameter names whose values are always scrubbed.
pub const PARAM_DENYLIST: &[&str] = &[
    "access",
    "access_token",
    "api_key",
    "apikey",
    "auth",
    "auth_token",
    "card[number]",
    "certificate",
    "credentials",
    "crypt",
    "key",
    "mysql_pwd",
    "otp",
    "passwd",
    "password",
    "private",
    "protected",
    "salt",
    "secret",
    "ssn",
    "stripetoken",
    "token",
];

/// Ignore prefixes plus reporting level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathPolicy {
    ignore: Vec<String>,
    reporting: UriReportingLevel,
}

impl PathPolicy {
    /// Creates a policy. Empty prefixes are dropped.
    #[must_use]
    pub fn new(ignore: impl IntoIterator<Item = String>, reporting: UriReportingLevel) -> Self {
        Self {
            ignore: ignore.into_iter().filter(|p| !p.is_empty()).collect(),
            reporting,
        }
    }

    /// Builds the policy from `ignore` and `uri_reporting`.
    #[must_use]
    pub fn from_config(config: &ScoutConfig) -> Self {
        Self::new(config.ignore.iter().cloned(), config.uri_reporting)
    }

    /// Returns the ignore prefixes.
    #[must_use]
    pub fn ignore(&self) -> &[String] {
        &self.ignore
    }

    /// Returns the reporting level.
    #[must_use]
    pub const fn reporting(&self) -> UriReportingLevel {
        self.reporting
    }

    /// Returns the first ignore prefix `path` starts with.
    #[must_use]
    pub fn ignored_by(&self, path: &str) -> Option<&str> {
        self.ignore
            .iter()
            .map(String::as_str)
            .find(|prefix| path.starts_with(prefix))
    }

    /// Returns true if `path` must not be reported.
    #[must_use]
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_by(path).is_some()
    }

    /// Reduces `path` to what the reporting level allows.
    #[must_use]
    pub fn filter(&self, path: &str) -> String {
        match self.reporting {
            UriReportingLevel::Raw => path.to_string(),
            UriReportingLevel::Path => strip_query(path).to_string(),
            UriReportingLevel::FilteredParams => scrub_params(path),
        }
    }
}

/// Drops the query string and fragment.
#[must_use]
pub fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

/// Replaces the values of denylisted query parameters with
/// [`FILTERED_MARKER`]. Everything else, parameter order included, is kept.
#[must_use]
pub fn scrub_params(path: &str) -> String {
    let (without_fragment, fragment) = match path.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (path, None),
    };
    let Some((base, query)) = without_fragment.split_once('?') else {
        return path.to_string();
    };

    let scrubbed: Vec<String> = query
        .split('&')
        .map(|pair| {
            let key = pair.split_once('=').map_or(pair, |(k, _)| k);
            if is_sensitive(key) {
                format!("{key}={FILTERED_MARKER}")
            } else {
                pair.to_string()
            }
        })
        .collect();

    let mut out = format!("{base}?{}", scrubbed.join("&"));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

fn is_sensitive(key: &str) -> bool {
    let spaced = key.replace('+', " ");
    let decoded = percent_decode_str(&spaced).decode_utf8_lossy();
    PARAM_DENYLIST.contains(&decoded.to_ascii_lowercase().as_str())
}
