use std::collections::BTreeMap;

/// Text patterns that mark a model message as a rate-limit signal.
pub const RATE_LIMIT_TEXT_PATTERNS: [&str; 5] = [
    "rate limit",
    "rate-limited",
    "too many requests",
    "quota exceeded",
    "usage limit reached",
];

/// Alternate-credential keys carry this prefix in the secret scope; the
/// stripped key overrides the primary value after a lane switch.
pub const ALTERNATE_SECRET_PREFIX: &str = "ALT_";

pub fn is_rate_limit_message(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    RATE_LIMIT_TEXT_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Whether this lane may rebuild onto the alternate credential set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthLaneConfig {
    pub fallback_enabled: bool,
}

impl Default for AuthLaneConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
        }
    }
}

/// Auth-lane fallback is restricted to the main and controller tiers.
/// Workers must fail loudly on rate-limit: a provider switch mid-execution
/// would invalidate the reproducibility claims in the run record.
pub fn auth_fallback_allowed(config: &AuthLaneConfig, group_folder: &str, is_main: bool) -> bool {
    if !config.fallback_enabled {
        return false;
    }
    is_main || group_folder.starts_with("controller-")
}

/// The two credential environments derived from the payload's secret
/// scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialEnvironment {
    pub primary: BTreeMap<String, String>,
    pub alternate: Option<BTreeMap<String, String>>,
}

/// Splits the secret scope into the primary environment and, when any
/// `ALT_`-prefixed keys exist, the alternate environment (primary values
/// overridden by the stripped alternates).
pub fn split_credential_sets(secrets: &BTreeMap<String, String>) -> CredentialEnvironment {
    let mut primary = BTreeMap::new();
    let mut overrides = BTreeMap::new();
    for (key, value) in secrets {
        match key.strip_prefix(ALTERNATE_SECRET_PREFIX) {
            Some(stripped) => {
                overrides.insert(stripped.to_string(), value.clone());
            }
            None => {
                primary.insert(key.clone(), value.clone());
            }
        }
    }
    let alternate = if overrides.is_empty() {
        None
    } else {
        let mut merged = primary.clone();
        merged.extend(overrides);
        Some(merged)
    };
    CredentialEnvironment { primary, alternate }
}
