//! Origin label resolution
//!
//! Every duration contribution is tagged with the deployment instance that
//! produced it. The label is either configured explicitly or derived from
//! the process environment, then cached until [`OriginResolver::invalidate`]
//! is called (typically on config reload).
//!
//! A change of the resolved label between two resolutions means the store
//! will now hold rows under two names for the same instance. What to do
//! about that is a policy decision: the resolver reports the change to a
//! callback and otherwise carries on.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Label used when detection yields nothing usable
pub const FALLBACK_ORIGIN: &str = "Unknown";

/// Configured name that switches on auto detection
pub const AUTO_ORIGIN: &str = "auto";

static SERVER_TOKENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(server|spigot|paper|bukkit)").expect("valid regex"));
static VERSION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\d+\.\d+.*").expect("valid regex"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]+").expect("valid regex"));

/// How the origin label is derived when the configured name is `auto`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginDetection {
    /// Use the configured name verbatim, even if it is `auto`
    Config,
    /// Name of the working directory
    #[default]
    Folder,
    /// File name of the running executable
    Executable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Explicit label, or `auto`
    #[serde(default = "default_origin_name")]
    pub name: String,

    #[serde(default)]
    pub detection: OriginDetection,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            name: default_origin_name(),
            detection: OriginDetection::default(),
        }
    }
}

fn default_origin_name() -> String {
    AUTO_ORIGIN.to_string()
}

/// Called with `(previous, current)` when the resolved label changes
pub type DriftPolicy = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Default drift policy: log the change and how to reconcile it
pub fn warn_on_drift() -> DriftPolicy {
    Arc::new(|previous, current| {
        tracing::warn!(
            "Origin label changed from '{}' to '{}'; accumulations now hold both labels. \
             Use the origin rename operation to merge the old rows.",
            previous,
            current
        );
    })
}

#[derive(Debug, Default)]
struct ResolverState {
    config: OriginConfig,
    cached: Option<String>,
    last_resolved: Option<String>,
}

/// Cached origin label with drift detection
pub struct OriginResolver {
    state: Mutex<ResolverState>,
    on_drift: DriftPolicy,
}

impl std::fmt::Debug for OriginResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResolver")
            .field("state", &*self.lock())
            .finish()
    }
}

impl OriginResolver {
    pub fn new(config: OriginConfig) -> Self {
        Self::with_policy(config, warn_on_drift())
    }

    /// Resolver that always yields `label`
    pub fn fixed(label: impl Into<String>) -> Self {
        Self::new(OriginConfig {
            name: label.into(),
            detection: OriginDetection::Config,
        })
    }

    pub fn with_policy(config: OriginConfig, on_drift: DriftPolicy) -> Self {
        Self {
            state: Mutex::new(ResolverState {
                config,
                ..Default::default()
            }),
            on_drift,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve the origin label, computing it on first use
    pub fn resolve(&self) -> String {
        let (label, drift) = {
            let mut state = self.lock();
            if let Some(cached) = &state.cached {
                return cached.clone();
            }

            let label = resolve_label(&state.config);
            let drift = state
                .last_resolved
                .as_ref()
                .filter(|previous| **previous != label)
                .map(|previous| (previous.clone(), label.clone()));

            state.cached = Some(label.clone());
            state.last_resolved = Some(label.clone());
            (label, drift)
        };

        if let Some((previous, current)) = drift {
            (self.on_drift)(&previous, &current);
        }

        label
    }

    /// Currently cached label without resolving
    pub fn cached(&self) -> Option<String> {
        self.lock().cached.clone()
    }

    /// Drop the cached label; the last resolved value is kept for drift detection
    pub fn invalidate(&self) {
        self.lock().cached = None;
    }

    /// Replace the configuration and invalidate the cache
    pub fn reconfigure(&self, config: OriginConfig) {
        let mut state = self.lock();
        state.config = config;
        state.cached = None;
    }
}

fn resolve_label(config: &OriginConfig) -> String {
    let configured = config.name.trim();
    if !configured.eq_ignore_ascii_case(AUTO_ORIGIN) {
        return non_empty_or_fallback(configured.to_string());
    }

    let detected = match config.detection {
        OriginDetection::Config => Some(configured.to_string()),
        OriginDetection::Folder => std::env::current_dir()
            .ok()
            .and_then(|dir| file_name_of(&dir))
            .map(|name| label_from_folder_name(&name)),
        OriginDetection::Executable => std::env::current_exe()
            .ok()
            .and_then(|exe| file_name_of(&exe))
            .map(|name| label_from_executable_name(&name)),
    };

    match detected {
        Some(label) => non_empty_or_fallback(label),
        None => {
            tracing::warn!(
                "Failed to auto-detect origin label ({:?}), using '{}'",
                config.detection,
                FALLBACK_ORIGIN
            );
            FALLBACK_ORIGIN.to_string()
        }
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn non_empty_or_fallback(label: String) -> String {
    if label.trim().is_empty() {
        FALLBACK_ORIGIN.to_string()
    } else {
        label
    }
}

/// Derive a label from a directory name: `survival_server-1` -> `Survival Server 1`
pub fn label_from_folder_name(folder: &str) -> String {
    capitalize_words(SEPARATORS.replace_all(folder, " ").trim())
}

/// Derive a label from an executable or jar name: `survival-paper-1.20.4.jar` -> `Survival`
pub fn label_from_executable_name(file_name: &str) -> String {
    let stem = file_name
        .strip_suffix(".jar")
        .or_else(|| file_name.strip_suffix(".exe"))
        .unwrap_or(file_name);
    let without_tokens = SERVER_TOKENS.replace_all(stem, "");
    let without_version = VERSION_SUFFIX.replace_all(&without_tokens, "");
    let spaced = SEPARATORS.replace_all(&without_version, " ");
    capitalize_words(spaced.trim())
}

fn capitalize_words(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
