//! Job options (§6.2), grounded in `options.c::get_options`.
//!
//! The reference reads these from environment variables set by its shell
//! front-end; this engine's CLI/caller layer is responsible for populating
//! an `Options` value however it likes (env vars, a config file via `serde`,
//! CLI flags) — this module owns only parsing the handful of
//! human-readable formats the reference uses (`;`-separated glob lists,
//! human-readable byte/duration strings) plus the defaults.

use std::time::Duration;

/// Default interval between progress callbacks when the caller hasn't
/// overridden it (`options.c`'s `DEFAULT_REFRESH_INTERVAL`, in milliseconds).
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Normal,
    Detailed,
    Paranoid,
}

/// `UD_SORTING`: which attribute the file-walk result is ordered by before
/// a strategy ever sees it. Purely a discovery-order preference — no
/// invariant in §3/§4 depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Path,
    Size,
    CreationTime,
    ModificationTime,
    AccessTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortKey {
    pub fn from_str(raw: &str) -> Option<SortKey> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "path" => Some(SortKey::Path),
            "size" => Some(SortKey::Size),
            "c_time" => Some(SortKey::CreationTime),
            "m_time" => Some(SortKey::ModificationTime),
            "a_time" => Some(SortKey::AccessTime),
            _ => None,
        }
    }
}

impl SortOrder {
    pub fn from_str(raw: &str) -> SortOrder {
        match raw.trim().to_ascii_lowercase().as_str() {
            "desc" => SortOrder::Descending,
            _ => SortOrder::Ascending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Glob patterns a file's path must match at least one of to be
    /// processed; empty means "no inclusion filter, process everything".
    pub include_patterns: Vec<String>,
    /// Glob patterns that exclude a file regardless of `include_patterns`.
    pub exclude_patterns: Vec<String>,
    /// Files above this size (in bytes) are skipped; `None` means no limit.
    pub size_limit: Option<u64>,
    /// Minimum fragment count for a file to be considered fragmented enough
    /// to report/defragment.
    pub fragments_threshold: u32,
    /// Wall-clock budget for the whole job; `None` means unbounded.
    pub time_limit: Option<Duration>,
    pub refresh_interval: Duration,
    pub disable_reports: bool,
    pub debug_level: DebugLevel,
    /// When set, the job runs analysis and strategy selection but issues no
    /// move ioctls — useful for previewing what a run would do.
    pub dry_run: bool,
    /// `None` means "whatever order the platform shim's walk returned",
    /// the reference's own default when `UD_SORTING` is unset.
    pub sort_key: Option<SortKey>,
    pub sort_order: SortOrder,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            size_limit: None,
            fragments_threshold: 0,
            time_limit: None,
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            disable_reports: false,
            debug_level: DebugLevel::Normal,
            dry_run: false,
            sort_key: None,
            sort_order: SortOrder::Ascending,
        }
    }
}

impl Options {
    /// Builds `Options` from the §6.2 environment variables, falling back
    /// to [`Default::default`] for anything unset or unparseable
    /// (`options.c::get_options`'s own "bad value ⇒ keep the default"
    /// behavior, rather than failing the job over a malformed env var).
    pub fn from_env() -> Self {
        let mut opts = Options::default();
        if let Ok(v) = std::env::var("UD_IN_FILTER") {
            opts.include_patterns = Self::parse_filter_list(&v);
        }
        if let Ok(v) = std::env::var("UD_EX_FILTER") {
            opts.exclude_patterns = Self::parse_filter_list(&v);
        }
        if let Ok(v) = std::env::var("UD_SIZELIMIT") {
            opts.size_limit = Self::parse_human_readable_bytes(&v);
        }
        if let Ok(v) = std::env::var("UD_FRAGMENTS_THRESHOLD") {
            if let Ok(n) = v.trim().parse() {
                opts.fragments_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("UD_TIME_LIMIT") {
            opts.time_limit = Self::parse_human_readable_duration(&v);
        }
        if let Ok(v) = std::env::var("UD_REFRESH_INTERVAL") {
            if let Ok(ms) = v.trim().parse() {
                opts.refresh_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("UD_DISABLE_REPORTS") {
            opts.disable_reports = v.trim() == "1";
        }
        if let Ok(v) = std::env::var("UD_DBGPRINT_LEVEL") {
            opts.debug_level = Self::debug_level_from_str(&v);
        }
        if let Ok(v) = std::env::var("UD_DRY_RUN") {
            opts.dry_run = v.trim() == "1";
        }
        if let Ok(v) = std::env::var("UD_SORTING") {
            opts.sort_key = SortKey::from_str(&v);
        }
        if let Ok(v) = std::env::var("UD_SORTING_ORDER") {
            opts.sort_order = SortOrder::from_str(&v);
        }
        opts
    }

    pub fn parse_filter_list(raw: &str) -> Vec<String> {
        raw.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Parses a human-readable byte count such as `"512MB"`, `"10 GB"` or a
    /// bare integer, mirroring `winx_hr_to_bytes`.
    pub fn parse_human_readable_bytes(raw: &str) -> Option<u64> {
        let raw = raw.trim();
        let split_at = raw.find(|c: char| !c.is_ascii_digit());
        let (digits, suffix) = match split_at {
            Some(i) => (&raw[..i], raw[i..].trim()),
            None => (raw, ""),
        };
        let value: u64 = digits.parse().ok()?;
        let multiplier: u64 = match suffix.to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "KB" | "K" => 1024,
            "MB" | "M" => 1024 * 1024,
            "GB" | "G" => 1024 * 1024 * 1024,
            "TB" | "T" => 1024 * 1024 * 1024 * 1024,
            _ => return None,
        };
        Some(value.saturating_mul(multiplier))
    }

    /// Parses a human-readable duration such as `"90m"`, `"2h"`, `"30s"`,
    /// mirroring `winx_str2time`.
    pub fn parse_human_readable_duration(raw: &str) -> Option<Duration> {
        let raw = raw.trim();
        let split_at = raw.find(|c: char| !c.is_ascii_digit())?;
        let (digits, suffix) = (&raw[..split_at], raw[split_at..].trim());
        let value: u64 = digits.parse().ok()?;
        let seconds = match suffix.to_ascii_lowercase().as_str() {
            "s" | "sec" => value,
            "m" | "min" => value * 60,
            "h" | "hr" => value * 3600,
            "d" => value * 86400,
            _ => return None,
        };
        Some(Duration::from_secs(seconds))
    }

    pub fn debug_level_from_str(raw: &str) -> DebugLevel {
        match raw.to_ascii_uppercase().as_str() {
            "DETAILED" => DebugLevel::Detailed,
            "PARANOID" => DebugLevel::Paranoid,
            _ => DebugLevel::Normal,
        }
    }

    /// Whether `path` matches at least one pattern in `patterns`
    /// (`winx_patcmp`'s list semantics: an empty list never matches).
    pub fn matches_any(path: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|p| glob_match(p, path))
    }
}

/// Hand-rolled `*`/`?` wildcard matcher, case-insensitive, mirroring
/// `winx_patcmp`'s own string-level implementation rather than reaching for
/// a full glob library for two wildcard characters.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let t: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    glob_match_chars(&p, &t)
}

fn glob_match_chars(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            glob_match_chars(&p[1..], t) || (!t.is_empty() && glob_match_chars(p, &t[1..]))
        }
        Some('?') => !t.is_empty() && glob_match_chars(&p[1..], &t[1..]),
        Some(c) => !t.is_empty() && t[0] == *c && glob_match_chars(&p[1..], &t[1..]),
    }
}
