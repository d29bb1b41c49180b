use std::time::Duration;

use jx_common::error::Error;

pub const DEFAULT_LOCAL_HELM_REPO_NAME: &str = "releases";
pub const DEFAULT_HELM_REPOSITORY_URL: &str = "http://jenkins-x-chartmuseum:8080";
pub const DEFAULT_PROMOTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_PULL_REQUEST_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Settings of `jx controller workflow`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Run a single reconciliation pass and exit.
    pub no_watch: bool,
    pub no_merge_pull_request: bool,
    pub pull_request_poll_interval: Duration,
    /// How often the store is listed for changed activities.
    pub resync_interval: Duration,
    /// Wall clock limit for one promote step, from the moment it started.
    pub promotion_timeout: Duration,
    /// Only activities built from these branches are promoted.
    pub release_branches: Vec<String>,
    pub local_helm_repo_name: String,
    pub helm_repository_url: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            no_watch: false,
            no_merge_pull_request: false,
            pull_request_poll_interval: DEFAULT_PULL_REQUEST_POLL_INTERVAL,
            resync_interval: Duration::from_secs(30),
            promotion_timeout: DEFAULT_PROMOTION_TIMEOUT,
            release_branches: vec!["master".to_string(), "main".to_string()],
            local_helm_repo_name: DEFAULT_LOCAL_HELM_REPO_NAME.to_string(),
            helm_repository_url: DEFAULT_HELM_REPOSITORY_URL.to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn is_release_branch(&self, branch: &str) -> bool {
        self.release_branches.iter().any(|b| b == branch)
    }
}

/// Parses Go style durations such as `20s`, `1h`, `1m30s` or `500ms`.
pub fn parse_duration(text: &str) -> Result<Duration, Error> {
    let invalid = || Error::Configuration(format!("invalid duration {text:?}"));
    let text = text.trim();
    if text.is_empty() {
        return Err(invalid());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = text;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return Err(invalid()),
        };
        total += Duration::from_secs_f64(seconds);
        rest = &rest[unit_len..];
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("20s").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for text in ["", "20", "s", "10x", "1h-5m"] {
            assert!(parse_duration(text).is_err(), "{text} should not parse");
        }
    }

    #[test]
    fn test_release_branches() {
        let config = ControllerConfig::default();
        assert!(config.is_release_branch("master"));
        assert!(config.is_release_branch("main"));
        assert!(!config.is_release_branch("feature-x"));
    }
}
