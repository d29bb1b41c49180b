use std::cmp::Ordering;

const DEFAULT_BRANCH: &str = "master";

/// Identity of a build pipeline, `owner/repository/branch`.
/// ---
/// `name` is the Kubernetes-safe form used as the prefix of
/// every `PipelineActivity` name for the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineId {
    pub id: String,
    pub name: String,
}

impl PipelineId {
    pub fn new(owner: &str, repository: &str, branch: &str) -> Self {
        Self::from_pipeline(&format!("{owner}/{repository}/{branch}"))
    }

    pub fn from_pipeline(pipeline: &str) -> Self {
        let id = pipeline.to_string();
        let name = to_valid_name(&id.to_lowercase().replace(['/', '_'], "-"));
        Self { id, name }
    }

    /// Name of the activity recording `build` of this pipeline.
    pub fn activity_name(&self, build: &str) -> String {
        format!("{}-{}", self.name, build)
    }
}

/// The parts of a pipeline string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDetails {
    pub owner: String,
    pub repository: String,
    pub branch: String,
}

impl PipelineDetails {
    /// Parses `owner/repository[/branch]`. The branch defaults to `master`.
    pub fn parse(pipeline: &str) -> Option<Self> {
        let mut parts = pipeline.split('/').filter(|p| !p.is_empty());
        let owner = parts.next()?;
        let repository = parts.next()?;
        let branch = parts.collect::<Vec<_>>().join("/");

        Some(Self {
            owner: owner.to_string(),
            repository: repository.to_string(),
            branch: if branch.is_empty() {
                DEFAULT_BRANCH.to_string()
            } else {
                branch
            },
        })
    }
}

/// Converts `text` into a lowercase DNS-1123 style name.
pub fn to_valid_name(text: &str) -> String {
    let mut name = String::with_capacity(text.len());
    let mut last_dash = true;

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || c == '.' {
            name.push(c);
            last_dash = false;
        } else if !last_dash {
            name.push('-');
            last_dash = true;
        }
    }

    name.trim_end_matches('-').to_string()
}

/// Trailing ASCII digits of `text`, or an empty string.
pub fn digit_suffix(text: &str) -> &str {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[start..]
}

/// Orders build identifiers numerically when both are numbers.
pub fn compare_builds(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_name() {
        let id = PipelineId::new("JStrachan", "my_repo", "master");
        assert_eq!(id.id, "JStrachan/my_repo/master");
        assert_eq!(id.name, "jstrachan-my-repo-master");
        assert_eq!(id.activity_name("12"), "jstrachan-my-repo-master-12");
    }

    #[test]
    fn test_pipeline_details_default_branch() {
        let details = PipelineDetails::parse("acme/cheese").unwrap();
        assert_eq!(details.owner, "acme");
        assert_eq!(details.repository, "cheese");
        assert_eq!(details.branch, "master");

        let details = PipelineDetails::parse("acme/cheese/feature/x").unwrap();
        assert_eq!(details.branch, "feature/x");

        assert!(PipelineDetails::parse("acme").is_none());
    }

    #[test]
    fn test_to_valid_name() {
        assert_eq!(to_valid_name("Promote My App!!"), "promote-my-app");
        assert_eq!(to_valid_name("v1.2.3"), "v1.2.3");
    }

    #[test]
    fn test_digit_suffix() {
        assert_eq!(digit_suffix("PR-123"), "123");
        assert_eq!(digit_suffix("abc"), "");
        assert_eq!(digit_suffix("42"), "42");
    }

    #[test]
    fn test_compare_builds_numeric() {
        assert_eq!(compare_builds("10", "9"), Ordering::Greater);
        assert_eq!(compare_builds("2", "2"), Ordering::Equal);
        assert_eq!(compare_builds("a", "b"), Ordering::Less);
    }
}
