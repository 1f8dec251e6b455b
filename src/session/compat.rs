//! Static Odoo compatibility table
//!
//! The session consults this table once per authentication; call sites ask
//! the selected [`VersionProfile`] instead of comparing version numbers.

use serde::Serialize;

/// Calling conventions of one Odoo major series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionProfile {
    /// Series label, e.g. `17.0`
    pub series: &'static str,
    /// Object endpoint method used for model calls
    pub object_method: &'static str,
    /// Whether the object method takes a keyword-argument struct
    pub keyword_arguments: bool,
    /// Whether `/xmlrpc/2/report` still exists
    pub report_service: bool,
    /// Whether the common endpoint answers `about`
    pub about: bool,
}

const fn modern(series: &'static str) -> VersionProfile {
    VersionProfile {
        series,
        object_method: "execute_kw",
        keyword_arguments: true,
        report_service: false,
        about: false,
    }
}

const fn with_about(series: &'static str) -> VersionProfile {
    VersionProfile {
        about: true,
        ..modern(series)
    }
}

const fn with_report_service(series: &'static str) -> VersionProfile {
    VersionProfile {
        report_service: true,
        ..with_about(series)
    }
}

/// Every series the gateway knows how to talk to, oldest first
pub const VERSION_PROFILES: &[VersionProfile] = &[
    VersionProfile {
        series: "7.0",
        object_method: "execute",
        keyword_arguments: false,
        report_service: true,
        about: true,
    },
    with_report_service("8.0"),
    with_report_service("9.0"),
    with_report_service("10.0"),
    with_about("11.0"),
    with_about("12.0"),
    with_about("13.0"),
    with_about("14.0"),
    with_about("15.0"),
    with_about("16.0"),
    modern("17.0"),
    modern("18.0"),
    modern("19.0"),
];

/// Look up the profile of a series label (`"17.0"`)
#[must_use]
pub fn profile_for(series: &str) -> Option<&'static VersionProfile> {
    VERSION_PROFILES.iter().find(|p| p.series == series)
}

/// Reduce a declared server version to its series label.
///
/// Handles `17.0`, `17.0+e`, `17.0-20240101` and SaaS builds such as
/// `saas~17.2`, which belong to the `17.0` series.
#[must_use]
pub fn series_of(server_version: &str) -> Option<String> {
    let trimmed = server_version.trim();
    let trimmed = trimmed.strip_prefix("saas~").unwrap_or(trimmed);
    let major: String = trimmed.chars().take_while(char::is_ascii_digit).collect();
    if major.is_empty() {
        None
    } else {
        Some(format!("{major}.0"))
    }
}

/// Labels of all supported series, for error messages
#[must_use]
pub fn supported_series() -> Vec<&'static str> {
    VERSION_PROFILES.iter().map(|p| p.series).collect()
}
