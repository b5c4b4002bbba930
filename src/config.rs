//! Config file grammar and validation.
//!
//! Lines are `option arg` or `option = arg`; `#` starts a comment. Unknown
//! options and malformed values are warned about and skipped — only the
//! "both intervals disabled" condition is fatal.

use crate::error::ConfigError;
use crate::rules::PatternRule;
use std::path::Path;

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/smax-postgress.cfg";

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const YEAR: i64 = 366 * DAY;

const DEFAULT_MAX_AGE: i64 = 90 * DAY;
const DEFAULT_MAX_SIZE: u64 = 1024;

/// Parsed configuration. Rule lists are kept in add order (head = most
/// recently added) so that [`crate::rules::RuleSet::from_config`] can
/// prepend in the same order the original daemon did.
#[derive(Debug, Clone)]
pub struct Config {
    pub smax_server: String,
    pub sql_server: String,
    pub sql_db: String,
    pub sql_user: String,
    pub sql_auth: Option<String>,
    pub use_hyper_tables: bool,
    /// Seconds between fast (incremental) update cycles. `-1` disables.
    pub update_interval: i64,
    /// Seconds between full snapshots. `-1` disables.
    pub snapshot_interval: i64,
    /// Maximum binary size (bytes) of a non-forced sample before it is dropped.
    pub max_size: u64,
    /// Maximum age (seconds) since last update before a variable stops logging
    /// unless forced. `-1` disables age-based exclusion.
    pub max_age: i64,
    pub excludes: Vec<PatternRule>,
    pub forces: Vec<PatternRule>,
    pub samplings: Vec<PatternRule>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            smax_server: "localhost".to_string(),
            sql_server: "localhost".to_string(),
            sql_db: "engdb".to_string(),
            sql_user: "loggerserver".to_string(),
            sql_auth: None,
            use_hyper_tables: false,
            update_interval: MINUTE,
            snapshot_interval: MINUTE,
            max_size: DEFAULT_MAX_SIZE,
            max_age: DEFAULT_MAX_AGE,
            excludes: Vec::new(),
            forces: Vec::new(),
            samplings: Vec::new(),
        }
    }
}

impl Config {
    /// Loads and parses a config file from disk, applying validation.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Config::parse(&text)
    }

    /// Parses config text per the grammar above. Unknown options and
    /// unparseable values are logged and skipped, not fatal.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut cfg = Config::default();
        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let (option, arg) = match split_option_arg(line) {
                Some(pair) => pair,
                None => {
                    tracing::warn!(line = line_no, %line, "malformed config line, skipping");
                    continue;
                }
            };
            if let Err(e) = apply_option(&mut cfg, line_no, &option, &arg) {
                tracing::warn!(line = line_no, error = %e, "skipping invalid config line");
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval <= 0 && self.snapshot_interval <= 0 {
            return Err(ConfigError::NoActiveInterval);
        }
        Ok(())
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Splits `option arg` or `option = arg` into its two parts.
fn split_option_arg(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if let Some(eq) = line.find('=') {
        let option = line[..eq].trim();
        let arg = line[eq + 1..].trim();
        if option.is_empty() {
            return None;
        }
        return Some((option.to_string(), arg.to_string()));
    }
    let mut parts = line.splitn(2, char::is_whitespace);
    let option = parts.next()?.trim();
    let arg = parts.next().unwrap_or("").trim();
    if option.is_empty() {
        return None;
    }
    Some((option.to_string(), arg.to_string()))
}

fn apply_option(cfg: &mut Config, line: usize, option: &str, arg: &str) -> Result<(), ConfigError> {
    macro_rules! invalid {
        () => {
            return Err(ConfigError::InvalidValue {
                line,
                option: option.to_string(),
                value: arg.to_string(),
            })
        };
    }

    match option {
        "smax_server" => cfg.smax_server = require_nonempty(arg, line, option)?,
        "sql_server" => cfg.sql_server = require_nonempty(arg, line, option)?,
        "sql_db" => cfg.sql_db = require_nonempty(arg, line, option)?,
        "sql_user" => cfg.sql_user = require_nonempty(arg, line, option)?,
        "sql_auth" => cfg.sql_auth = Some(arg.to_string()),
        "use_hyper_tables" => match parse_bool(arg) {
            Some(b) => cfg.use_hyper_tables = b,
            None => invalid!(),
        },
        "update_interval" => match parse_time_spec(arg) {
            Some(v) if v < 0 || v >= MINUTE => cfg.update_interval = v,
            _ => invalid!(),
        },
        "snapshot_interval" => match parse_time_spec(arg) {
            Some(v) if v < 0 || v >= MINUTE => cfg.snapshot_interval = v,
            _ => invalid!(),
        },
        "max_size" => match arg.parse::<u64>() {
            Ok(v) if v >= 8 => cfg.max_size = v,
            _ => invalid!(),
        },
        "max_age" => match parse_time_spec(arg) {
            Some(v) if v < 0 || v >= DAY => cfg.max_age = v,
            _ => invalid!(),
        },
        "exclude" | "include" => {
            if arg.is_empty() {
                invalid!();
            }
            let ival = if option == "include" { 0 } else { 1 };
            cfg.excludes.insert(0, PatternRule::new(arg, ival));
        }
        "always" => {
            if arg.is_empty() {
                invalid!();
            }
            cfg.forces.insert(0, PatternRule::new(arg, 1));
        }
        "sample" => {
            let mut parts = arg.splitn(2, char::is_whitespace);
            let stride: i64 = match parts.next().and_then(|s| s.parse().ok()) {
                Some(v) if v >= 1 => v,
                _ => invalid!(),
            };
            let pattern = parts.next().unwrap_or("").trim();
            if pattern.is_empty() {
                invalid!();
            }
            cfg.samplings.insert(0, PatternRule::new(pattern, stride));
        }
        other => {
            return Err(ConfigError::UnknownOption {
                line,
                option: other.to_string(),
            })
        }
    }
    Ok(())
}

fn require_nonempty(arg: &str, line: usize, option: &str) -> Result<String, ConfigError> {
    if arg.is_empty() {
        Err(ConfigError::InvalidValue {
            line,
            option: option.to_string(),
            value: arg.to_string(),
        })
    } else {
        Ok(arg.to_string())
    }
}

/// Accepts `true`/`1` -> true, `false`/`0` -> false; anything else is an
/// invalid value.
fn parse_bool(arg: &str) -> Option<bool> {
    match arg {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parses a time spec: `<number>[smhdwy]`, or `"none"` for -1 (disabled).
fn parse_time_spec(arg: &str) -> Option<i64> {
    if arg.eq_ignore_ascii_case("none") {
        return Some(-1);
    }
    if arg.is_empty() {
        return None;
    }
    let (digits, unit) = arg.split_at(arg.len() - 1);
    let (digits, mult) = if unit.chars().next()?.is_ascii_digit() {
        (arg, 1)
    } else {
        let mult = match unit {
            "s" => 1,
            "m" => MINUTE,
            "h" => HOUR,
            "d" => DAY,
            "w" => WEEK,
            "y" => YEAR,
            _ => return None,
        };
        (digits, mult)
    };
    let n: i64 = digits.parse().ok()?;
    if n < 0 {
        return None;
    }
    Some(n * mult)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_specs() {
        assert_eq!(parse_time_spec("60s"), Some(60));
        assert_eq!(parse_time_spec("5m"), Some(300));
        assert_eq!(parse_time_spec("2h"), Some(7200));
        assert_eq!(parse_time_spec("1d"), Some(86400));
        assert_eq!(parse_time_spec("1w"), Some(604800));
        assert_eq!(parse_time_spec("1y"), Some(366 * 86400));
        assert_eq!(parse_time_spec("none"), Some(-1));
        assert_eq!(parse_time_spec("NONE"), Some(-1));
        assert_eq!(parse_time_spec("bogus"), None);
        assert_eq!(parse_time_spec("-5s"), None);
    }

    #[test]
    fn bare_number_defaults_to_seconds() {
        assert_eq!(parse_time_spec("120"), Some(120));
    }

    #[test]
    fn accepts_equals_and_space_grammar() {
        let cfg = Config::parse("sql_db = mydb\nsql_user mylogger\n").unwrap();
        assert_eq!(cfg.sql_db, "mydb");
        assert_eq!(cfg.sql_user, "mylogger");
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let cfg = Config::parse("# a comment\n\nsql_db mydb # trailing comment\n").unwrap();
        assert_eq!(cfg.sql_db, "mydb");
    }

    #[test]
    fn unknown_option_is_skipped_not_fatal() {
        let cfg = Config::parse("bogus_option 5\nsql_db mydb\n").unwrap();
        assert_eq!(cfg.sql_db, "mydb");
    }

    #[test]
    fn sub_minimum_interval_is_rejected_and_keeps_default() {
        let cfg = Config::parse("update_interval 10s\n").unwrap();
        assert_eq!(cfg.update_interval, MINUTE);
        let cfg = Config::parse("snapshot_interval 5s\n").unwrap();
        assert_eq!(cfg.snapshot_interval, MINUTE);
    }

    #[test]
    fn interval_none_is_still_accepted_when_the_other_runs() {
        let cfg = Config::parse("snapshot_interval none\n").unwrap();
        assert_eq!(cfg.snapshot_interval, -1);
        assert_eq!(cfg.update_interval, MINUTE);
    }

    #[test]
    fn both_intervals_disabled_is_fatal() {
        let err = Config::parse("update_interval none\nsnapshot_interval none\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoActiveInterval));
    }

    #[test]
    fn boolean_parsing_accepts_true_1_false_0_only() {
        let cfg = Config::parse("use_hyper_tables true\n").unwrap();
        assert!(cfg.use_hyper_tables);
        let cfg = Config::parse("use_hyper_tables 0\n").unwrap();
        assert!(!cfg.use_hyper_tables);
        // Invalid values are warned-and-skipped, leaving the default (false).
        let cfg = Config::parse("use_hyper_tables maybe\n").unwrap();
        assert!(!cfg.use_hyper_tables);
    }

    #[test]
    fn rule_lists_accumulate_in_prepend_order() {
        let cfg = Config::parse("exclude a*\nexclude b*\n").unwrap();
        // Most recently added ("b*") is at the head.
        assert_eq!(cfg.excludes[0].pattern, "b*");
        assert_eq!(cfg.excludes[1].pattern, "a*");
    }

    #[test]
    fn sample_rule_parses_stride_and_pattern() {
        let cfg = Config::parse("sample 4 weather:*\n").unwrap();
        assert_eq!(cfg.samplings[0].ival, 4);
        assert_eq!(cfg.samplings[0].pattern, "weather:*");
    }
}
