//! Caching strategies and the per-request routing decision.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::network::Request;

/// Paths that carry live telemetry and must never be served from cache.
pub const TELEMETRY_PATHS: &[&str] = &["/info", "/nodes"];

/// Caching strategy, selected once per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Precache the asset manifest at install; serve from cache, fall back to network.
    PrecacheFirst,
    /// Network first with cache fallback; exempt paths always go to network.
    #[default]
    NetworkFirstExempt,
    /// Network first with cache fallback for every request.
    NetworkFirstUniform,
}

/// What the worker does during install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPolicy {
    /// Fill the cache from the manifest; wait for old pages to close.
    Precache,
    /// Skip precaching, skip waiting, claim open pages on activation.
    ImmediateClaim,
}

impl CacheStrategy {
    /// All strategies, in order of sophistication.
    pub const ALL: [Self; 3] = [
        Self::PrecacheFirst,
        Self::NetworkFirstExempt,
        Self::NetworkFirstUniform,
    ];

    /// The install policy that goes with this strategy.
    #[must_use]
    pub const fn install_policy(self) -> InstallPolicy {
        match self {
            Self::PrecacheFirst => InstallPolicy::Precache,
            Self::NetworkFirstExempt | Self::NetworkFirstUniform => InstallPolicy::ImmediateClaim,
        }
    }

    /// Kebab-case name, as used in config files and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrecacheFirst => "precache-first",
            Self::NetworkFirstExempt => "network-first-exempt",
            Self::NetworkFirstUniform => "network-first-uniform",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "precache-first" | "cache-first" | "precache" => Ok(Self::PrecacheFirst),
            "network-first-exempt" | "network-first" => Ok(Self::NetworkFirstExempt),
            "network-first-uniform" | "uniform" => Ok(Self::NetworkFirstUniform),
            other => Err(Error::InvalidState(format!("unknown strategy: {other}"))),
        }
    }
}

/// Where a response should come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Cache hit wins; network on miss.
    CacheThenNetwork,
    /// Network; cache only if the network fails.
    NetworkThenCache,
    /// Network only; the cache is neither read nor written.
    NetworkOnly,
}

impl ResponseSource {
    /// Whether responses for this route may be written to the cache.
    #[must_use]
    pub const fn may_store(self) -> bool {
        !matches!(self, Self::NetworkOnly)
    }
}

/// Routing policy: a strategy plus its path exemptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    strategy: CacheStrategy,
    exempt_paths: Vec<String>,
}

impl FetchPolicy {
    /// Creates a policy. Exemptions only apply to [`CacheStrategy::NetworkFirstExempt`].
    #[must_use]
    pub fn new(strategy: CacheStrategy, exempt_paths: Vec<String>) -> Self {
        Self {
            strategy,
            exempt_paths,
        }
    }

    /// The underlying strategy.
    #[must_use]
    pub const fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// Whether `path` is exempt from caching under this policy.
    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        self.strategy == CacheStrategy::NetworkFirstExempt
            && self.exempt_paths.iter().any(|p| p == path)
    }

    /// Decides where the response for `request` comes from.
    #[must_use]
    pub fn route(&self, request: &Request) -> ResponseSource {
        match self.strategy {
            CacheStrategy::PrecacheFirst => ResponseSource::CacheThenNetwork,
            CacheStrategy::NetworkFirstExempt if self.is_exempt(request.path()) => {
                ResponseSource::NetworkOnly
            }
            CacheStrategy::NetworkFirstExempt | CacheStrategy::NetworkFirstUniform => {
                ResponseSource::NetworkThenCache
            }
        }
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::new(
            CacheStrategy::default(),
            TELEMETRY_PATHS.iter().map(ToString::to_string).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn telemetry() -> Vec<String> {
        TELEMETRY_PATHS.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn precache_first_always_tries_cache() {
        let policy = FetchPolicy::new(CacheStrategy::PrecacheFirst, telemetry());
        assert_eq!(
            policy.route(&Request::get("/info")),
            ResponseSource::CacheThenNetwork
        );
        assert_eq!(
            policy.route(&Request::get("/static/app.js")),
            ResponseSource::CacheThenNetwork
        );
    }

    #[test]
    fn exempt_paths_bypass_cache_exactly() {
        let policy = FetchPolicy::new(CacheStrategy::NetworkFirstExempt, telemetry());
        assert_eq!(policy.route(&Request::get("/info")), ResponseSource::NetworkOnly);
        assert_eq!(
            policy.route(&Request::get("/nodes?page=2")),
            ResponseSource::NetworkOnly
        );
        assert_eq!(
            policy.route(&Request::get("/information")),
            ResponseSource::NetworkThenCache
        );
        assert_eq!(
            policy.route(&Request::get("/nodes/1")),
            ResponseSource::NetworkThenCache
        );
    }

    #[test]
    fn uniform_ignores_exemptions() {
        let policy = FetchPolicy::new(CacheStrategy::NetworkFirstUniform, telemetry());
        assert!(!policy.is_exempt("/info"));
        assert_eq!(
            policy.route(&Request::get("/info")),
            ResponseSource::NetworkThenCache
        );
    }

    #[test]
    fn install_policy_per_strategy() {
        assert_eq!(
            CacheStrategy::PrecacheFirst.install_policy(),
            InstallPolicy::Precache
        );
        assert_eq!(
            CacheStrategy::NetworkFirstExempt.install_policy(),
            InstallPolicy::ImmediateClaim
        );
        assert_eq!(
            CacheStrategy::NetworkFirstUniform.install_policy(),
            InstallPolicy::ImmediateClaim
        );
    }

    #[test]
    fn strategy_parses_names_and_aliases() {
        for strategy in CacheStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<CacheStrategy>().unwrap(), strategy);
        }
        assert_eq!(
            "Cache-First".parse::<CacheStrategy>().unwrap(),
            CacheStrategy::PrecacheFirst
        );
        assert!("offline-only".parse::<CacheStrategy>().is_err());
    }

    #[test]
    fn strategy_serializes_kebab_case() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            strategy: CacheStrategy,
        }
        let toml_str = toml::to_string(&Wrapper {
            strategy: CacheStrategy::NetworkFirstUniform,
        })
        .unwrap();
        assert!(toml_str.contains("network-first-uniform"));
        let back: Wrapper = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.strategy, CacheStrategy::NetworkFirstUniform);
    }

    proptest! {
        #[test]
        fn only_listed_paths_are_network_only(path in "/[a-z]{0,8}(/[a-z]{1,6})?") {
            let policy = FetchPolicy::new(CacheStrategy::NetworkFirstExempt, telemetry());
            let source = policy.route(&Request::get(path.clone()));
            let listed = path == "/info" || path == "/nodes";
            prop_assert_eq!(source == ResponseSource::NetworkOnly, listed);
        }

        #[test]
        fn non_exempt_strategies_never_route_network_only(path in "/[a-z/]{0,12}") {
            for strategy in [CacheStrategy::PrecacheFirst, CacheStrategy::NetworkFirstUniform] {
                let policy = FetchPolicy::new(strategy, telemetry());
                prop_assert_ne!(policy.route(&Request::get(path.clone())), ResponseSource::NetworkOnly);
            }
        }
    }
}
