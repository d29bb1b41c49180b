use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::common::meta::ObjectMeta;

pub const ENVIRONMENT_KIND: &str = "Environment";
pub const DEFAULT_BASE_BRANCH: &str = "master";

/// A named deployment target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub metadata: ObjectMeta,
    pub spec: EnvironmentSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentSpec {
    pub label: String,
    pub namespace: String,
    pub order: i32,
    pub kind: EnvironmentKind,
    pub promotion_strategy: PromotionStrategy,
    pub source: EnvironmentRepository,
}

/// Git repository holding the environment's desired state.
/// An empty `url` means the environment is not managed through GitOps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentRepository {
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

#[derive(
    Clone, Debug, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum EnvironmentKind {
    #[default]
    Permanent,
    Preview,
    Development,
}

#[derive(
    Clone, Debug, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum PromotionStrategy {
    #[default]
    #[serde(alias = "Auto")]
    #[strum(to_string = "Automatic", serialize = "Auto")]
    Automatic,
    Manual,
    Never,
}

impl Environment {
    pub fn new(name: &str, order: i32, strategy: PromotionStrategy) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: EnvironmentSpec {
                label: name.to_string(),
                namespace: format!("jx-{name}"),
                order,
                promotion_strategy: strategy,
                ..Default::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_permanent(&self) -> bool {
        self.spec.kind == EnvironmentKind::Permanent
    }

    /// Promotions to this environment go through a pull request.
    pub fn is_gitops(&self) -> bool {
        !self.spec.source.url.is_empty() && self.is_permanent()
    }

    pub fn is_manual(&self) -> bool {
        self.spec.promotion_strategy == PromotionStrategy::Manual
    }

    pub fn is_automatic(&self) -> bool {
        self.spec.promotion_strategy == PromotionStrategy::Automatic
    }

    /// Branch promotion pull requests target.
    pub fn base_branch(&self) -> &str {
        if self.spec.source.git_ref.is_empty() {
            DEFAULT_BASE_BRANCH
        } else {
            &self.spec.source.git_ref
        }
    }
}

/// Sorts environments by `order`, then by name.
pub fn sort_environments(environments: &mut [Environment]) {
    environments.sort_by(|a, b| {
        a.spec
            .order
            .cmp(&b.spec.order)
            .then_with(|| a.name().cmp(b.name()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_by_order_then_name() {
        let mut envs = vec![
            Environment::new("production", 200, PromotionStrategy::Manual),
            Environment::new("staging", 100, PromotionStrategy::Automatic),
            Environment::new("qa", 100, PromotionStrategy::Automatic),
        ];
        sort_environments(&mut envs);
        let names: Vec<&str> = envs.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["qa", "staging", "production"]);
    }

    #[test]
    fn test_gitops_requires_source_and_permanent() {
        let mut env = Environment::new("staging", 100, PromotionStrategy::Automatic);
        assert!(!env.is_gitops());

        env.spec.source.url = "https://github.com/acme/environment-staging.git".to_string();
        assert!(env.is_gitops());
        assert_eq!(env.base_branch(), "master");

        env.spec.kind = EnvironmentKind::Preview;
        assert!(!env.is_gitops());
    }

    #[test]
    fn test_strategy_accepts_auto_alias() {
        let env: EnvironmentSpec =
            serde_yaml::from_str("promotionStrategy: Auto\norder: 5\nsource:\n  ref: main\n")
                .unwrap();
        assert_eq!(env.promotion_strategy, PromotionStrategy::Automatic);
        assert_eq!(env.order, 5);
        assert_eq!(env.source.git_ref, "main");
    }
}
