use jx_common::{environment::Environment, error::Error, helm::UpgradeChartOptions};
use tracing::info;

use crate::context::JxContext;

use super::PromoteOptions;

/// Namespace a non-GitOps environment installs into.
pub fn environment_namespace(env: &Environment) -> String {
    if env.spec.namespace.is_empty() {
        format!("jx-{}", env.name())
    } else {
        env.spec.namespace.clone()
    }
}

/// Helm upgrade arguments installing the promoted version into `env`.
pub fn upgrade_options(opts: &PromoteOptions, env: &Environment) -> UpgradeChartOptions {
    let namespace = environment_namespace(env);
    let release_name = opts
        .release_name
        .clone()
        .unwrap_or_else(|| format!("{}-{}", namespace, opts.application));

    UpgradeChartOptions {
        chart: format!("{}/{}", opts.local_helm_repo_name, opts.application),
        release_name,
        namespace,
        version: Some(opts.version.clone()),
        wait: true,
        timeout: Some(opts.timeout),
    }
}

/// Installs the version directly with helm.
pub async fn promote_via_helm(
    ctx: &JxContext,
    opts: &PromoteOptions,
    env: &Environment,
) -> Result<(), Error> {
    if !opts.no_helm_update {
        ctx.helmer.update_repo().await?;
    }

    let options = upgrade_options(opts, env);
    info!(
        "Promote [{}]: upgrading release {} to {} {} in namespace {}",
        env.name(),
        options.release_name,
        options.chart,
        opts.version,
        options.namespace
    );
    ctx.helmer.upgrade_chart(&options).await
}

#[cfg(test)]
mod tests {
    use jx_common::environment::PromotionStrategy;

    use super::*;

    #[test]
    fn test_upgrade_options() {
        let env = Environment::new("staging", 100, PromotionStrategy::Automatic);
        let opts = PromoteOptions::new("cheese", "1.2.3", "staging");

        let options = upgrade_options(&opts, &env);
        assert_eq!(options.chart, "releases/cheese");
        assert_eq!(options.release_name, "jx-staging-cheese");
        assert_eq!(options.namespace, "jx-staging");
        assert_eq!(options.version.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn test_explicit_release_name_and_empty_namespace() {
        let mut env = Environment::new("qa", 100, PromotionStrategy::Automatic);
        env.spec.namespace.clear();
        let mut opts = PromoteOptions::new("cheese", "1.2.3", "qa");
        opts.release_name = Some("cheddar".to_string());

        let options = upgrade_options(&opts, &env);
        assert_eq!(options.release_name, "cheddar");
        assert_eq!(options.namespace, "jx-qa");
    }
}
