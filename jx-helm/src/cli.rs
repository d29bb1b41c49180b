use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use jx_common::{
    error::Error,
    helm::{Helmer, ReleaseSummary, UpgradeChartOptions},
};
use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info};

/// Upper bound for a single helm invocation when the caller sets none.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// [Helmer] backed by the `helm` binary.
#[derive(Clone, Debug)]
pub struct HelmCli {
    binary: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[derive(Debug, Deserialize)]
struct HelmListEntry {
    name: String,
    namespace: String,
    chart: String,
    #[serde(default)]
    app_version: String,
    status: String,
}

impl HelmCli {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    async fn run(&self, args: &[String], limit: Duration) -> Result<String, Error> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("HelmCli: helm {}", args.join(" "));

        let output = timeout(limit, cmd.output())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "helm {} did not finish within {:?}",
                    args.join(" "),
                    limit
                ))
            })?
            .map_err(|e| Error::Helm(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(Error::Helm(format!(
                "helm {} failed with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

pub(crate) fn upgrade_args(options: &UpgradeChartOptions) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        "--namespace".to_string(),
        options.namespace.clone(),
    ];
    if let Some(version) = options.version.as_ref().filter(|v| !v.is_empty()) {
        args.push("--version".to_string());
        args.push(version.clone());
    }
    if options.wait {
        args.push("--wait".to_string());
    }
    if let Some(limit) = options.timeout {
        args.push("--timeout".to_string());
        args.push(format!("{}s", limit.as_secs()));
    }
    args.push(options.release_name.clone());
    args.push(options.chart.clone());
    args
}

#[async_trait]
impl Helmer for HelmCli {
    async fn update_repo(&self) -> Result<(), Error> {
        self.run(&["repo".to_string(), "update".to_string()], DEFAULT_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn upgrade_chart(&self, options: &UpgradeChartOptions) -> Result<(), Error> {
        info!(
            "HelmCli: upgrading release {} to chart {} in namespace {}",
            options.release_name, options.chart, options.namespace
        );
        // leave headroom over helm's own --timeout
        let limit = options
            .timeout
            .map(|t| t + Duration::from_secs(30))
            .unwrap_or(DEFAULT_TIMEOUT);
        self.run(&upgrade_args(options), limit).await?;
        Ok(())
    }

    async fn delete_release(&self, namespace: &str, release_name: &str) -> Result<(), Error> {
        let args = [
            "uninstall".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            release_name.to_string(),
        ];
        self.run(&args, DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    async fn status_releases(&self, namespace: &str) -> Result<Vec<ReleaseSummary>, Error> {
        let args = [
            "list".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.run(&args, DEFAULT_TIMEOUT).await?;
        parse_release_list(&output)
    }
}

pub(crate) fn parse_release_list(output: &str) -> Result<Vec<ReleaseSummary>, Error> {
    if output.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<HelmListEntry> = serde_json::from_str(output)?;
    Ok(entries
        .into_iter()
        .map(|e| ReleaseSummary {
            name: e.name,
            namespace: e.namespace,
            chart: e.chart,
            app_version: e.app_version,
            status: e.status,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_args() {
        let args = upgrade_args(&UpgradeChartOptions {
            chart: "chartmuseum/cheese".to_string(),
            release_name: "jx-staging-cheese".to_string(),
            namespace: "jx-staging".to_string(),
            version: Some("1.0.0".to_string()),
            wait: true,
            timeout: Some(Duration::from_secs(300)),
        });
        assert_eq!(
            args.join(" "),
            "upgrade --install --namespace jx-staging --version 1.0.0 --wait --timeout 300s jx-staging-cheese chartmuseum/cheese"
        );
    }

    #[test]
    fn test_parse_release_list() {
        let json = r#"[{"name":"jx-staging-cheese","namespace":"jx-staging","revision":"3","chart":"cheese-1.0.0","app_version":"1.0.0","status":"deployed"}]"#;
        let releases = parse_release_list(json).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].status, "deployed");
        assert!(parse_release_list("").unwrap().is_empty());
    }
}
