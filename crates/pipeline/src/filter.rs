use docsift_common::{FilterConfig, PipelineError, RemoteEntry, Result};
use regex::Regex;
use std::fmt;

/// One exclusion rule, evaluated against a remote entry
#[derive(Debug, Clone)]
pub enum ExclusionRule {
    /// Case-insensitive suffix of the full path, e.g. ".zip"
    Suffix(String),
    /// Exact last path segment, e.g. ".DS_Store"
    FileName(String),
    /// Regular expression matched against the full path
    Pattern(Regex),
}

impl ExclusionRule {
    pub fn suffix(suffix: &str) -> Self {
        Self::Suffix(suffix.to_lowercase())
    }

    pub fn matches(&self, entry: &RemoteEntry) -> bool {
        match self {
            Self::Suffix(suffix) => entry.path.to_lowercase().ends_with(suffix.as_str()),
            Self::FileName(name) => entry.file_name() == name,
            Self::Pattern(regex) => regex.is_match(&entry.path),
        }
    }
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suffix(suffix) => write!(f, "suffix {}", suffix),
            Self::FileName(name) => write!(f, "file name {}", name),
            Self::Pattern(regex) => write!(f, "pattern {}", regex.as_str()),
        }
    }
}

/// Ordered exclusion rules. `admit` is pure: it only looks at the entry.
///
/// The configured noise segment is deliberately not a rule here. It is
/// part of every remote path and stays in display paths; the prompts
/// tell the model to ignore it.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    rules: Vec<ExclusionRule>,
}

impl PathFilter {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut rules: Vec<ExclusionRule> = config
            .exclude_suffixes
            .iter()
            .map(|s| ExclusionRule::suffix(s))
            .collect();
        rules.extend(
            config
                .exclude_file_names
                .iter()
                .map(|name| ExclusionRule::FileName(name.clone())),
        );
        for pattern in &config.exclude_patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                PipelineError::config(format!("invalid exclusion pattern {}: {}", pattern, e))
            })?;
            rules.push(ExclusionRule::Pattern(regex));
        }
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    /// Directories are never admitted, they cannot be fetched
    pub fn admit(&self, entry: &RemoteEntry) -> bool {
        !entry.is_directory && self.explain(entry).is_none()
    }

    /// First rule that excludes the entry
    pub fn explain(&self, entry: &RemoteEntry) -> Option<&ExclusionRule> {
        self.rules.iter().find(|rule| rule.matches(entry))
    }
}
