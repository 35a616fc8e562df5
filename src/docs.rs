//! Documentation Site Configuration
//!
//! Declarative settings of the project documentation site: navigation,
//! sidebar, search, theming and which dead links the link checker may
//! ignore. Nothing is rendered here; `metis docs-config` prints the
//! configuration as JSON.

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{MetisError, Result};

/// A `(label, url)` entry of the navigation bar or a sidebar group.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Link {
    pub text: String,
    pub link: String,
}

impl Link {
    fn new(text: &str, link: &str) -> Self {
        Self {
            text: text.to_string(),
            link: link.to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SidebarGroup {
    pub text: String,
    pub items: Vec<Link>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SocialLink {
    pub icon: String,
    pub link: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Footer {
    pub message: String,
    pub copyright: String,
}

/// Edit-link template; `:path` is replaced by the page source path.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EditLink {
    pub pattern: String,
    pub text: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MarkdownTheme {
    pub light: String,
    pub dark: String,
}

const LOCALHOST_LINKS: &str = r"^https?://localhost";

fn serialize_regex<S: Serializer>(re: &Regex, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(re.as_str())
}

/// Suppresses dead-link warnings for matching URLs.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum DeadLinkRule {
    /// Regular expression matched against the URL
    Pattern(#[serde(serialize_with = "serialize_regex")] Regex),
    /// Case-insensitive substring
    Contains(String),
}

impl DeadLinkRule {
    /// Compiles a pattern rule.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern).map(Self::Pattern).map_err(|e| {
            MetisError::Config(format!("invalid dead-link pattern {}: {}", pattern, e))
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(url),
            Self::Contains(needle) => url.to_lowercase().contains(&needle.to_lowercase()),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct DocsSiteConfig {
    pub title: String,
    pub description: String,
    pub nav: Vec<Link>,
    pub sidebar: Vec<SidebarGroup>,
    pub search_provider: String,
    pub social_links: Vec<SocialLink>,
    pub footer: Footer,
    pub edit_link: EditLink,
    pub markdown_theme: MarkdownTheme,
    pub ignore_dead_links: Vec<DeadLinkRule>,
}

impl Default for DocsSiteConfig {
    fn default() -> Self {
        Self {
            title: "Metis".to_string(),
            description: "Kubernetes-native Workflow Execution Service - A federation-promoting, \
                          highly-pluggable, GA4GH WES 1.1.0 compliant workflow execution service"
                .to_string(),
            nav: vec![
                Link::new("Home", "/"),
                Link::new("Introduction", "/intro"),
                Link::new("GitHub", "https://github.com/jaeaeich/metis"),
            ],
            sidebar: vec![SidebarGroup {
                text: "Getting Started".to_string(),
                items: vec![Link::new("Introduction", "/intro")],
            }],
            search_provider: "local".to_string(),
            social_links: vec![SocialLink {
                icon: "github".to_string(),
                link: "https://github.com/jaeaeich/metis".to_string(),
            }],
            footer: Footer {
                message: "Released under the Apache License 2.0.".to_string(),
                copyright: "Copyright © 2025 jaeaeich (Javed Habib)".to_string(),
            },
            edit_link: EditLink {
                pattern: "https://github.com/jaeaeich/metis/edit/main/docs/:path".to_string(),
                text: "Edit this page on GitHub".to_string(),
            },
            markdown_theme: MarkdownTheme {
                light: "github-light".to_string(),
                dark: "one-dark-pro".to_string(),
            },
            ignore_dead_links: [
                DeadLinkRule::pattern(LOCALHOST_LINKS).ok(),
                Some(DeadLinkRule::Contains("ignore".to_string())),
            ]
            .into_iter()
            .flatten()
            .collect(),
        }
    }
}

impl DocsSiteConfig {
    /// Checks the fields the site cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(MetisError::Config("docs title must not be empty".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(MetisError::Config(
                "docs description must not be empty".to_string(),
            ));
        }
        if self.nav.is_empty() {
            return Err(MetisError::Config(
                "docs navigation must have at least one entry".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_dead_link_ignored(&self, url: &str) -> bool {
        self.ignore_dead_links.iter().any(|rule| rule.matches(url))
    }

    pub fn edit_link_for(&self, path: &str) -> String {
        self.edit_link
            .pattern
            .replace(":path", path.trim_start_matches('/'))
    }
}
