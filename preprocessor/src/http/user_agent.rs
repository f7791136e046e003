//! User-Agent rotation: deterministic round-robin or uniformly random,
//! sharing one mutex-guarded index and a configured agent list.

use rand::seq::SliceRandom;
use tokio::sync::Mutex;

pub struct UserAgentRotator {
    default_user_agent: String,
    agents: Vec<String>,
    enabled: bool,
    round_robin_index: Mutex<usize>,
}

impl UserAgentRotator {
    pub fn new(default_user_agent: impl Into<String>, agents: Vec<String>, enabled: bool) -> Self {
        Self {
            default_user_agent: default_user_agent.into(),
            agents,
            enabled,
            round_robin_index: Mutex::new(0),
        }
    }

    /// Monotonic (modulo list length) round-robin selection.
    pub async fn next_round_robin(&self) -> String {
        if !self.enabled || self.agents.is_empty() {
            return self.default_user_agent.clone();
        }
        let mut idx = self.round_robin_index.lock().await;
        let agent = self.agents[*idx % self.agents.len()].clone();
        *idx = (*idx + 1) % self.agents.len();
        agent
    }

    /// Uniformly random selection drawn from a secure RNG.
    pub fn random(&self) -> String {
        if !self.enabled || self.agents.is_empty() {
            return self.default_user_agent.clone();
        }
        let mut rng = rand::rngs::OsRng;
        self.agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| self.default_user_agent.clone())
    }
}

/// Heuristic classification of a User-Agent string used to decide which
/// browser-style header set to synthesize: `sec-ch-ua*` for Chrome-class
/// UAs, `Cache-Control` for Firefox-class UAs.
pub fn is_chrome_class(user_agent: &str) -> bool {
    user_agent.contains("Chrome") && !user_agent.contains("Firefox")
}

pub fn is_firefox_class(user_agent: &str) -> bool {
    user_agent.contains("Firefox")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_robin_is_monotonic_modulo_list_length() {
        let rotator = UserAgentRotator::new("default-ua", vec!["a".into(), "b".into(), "c".into()], true);
        let seq: Vec<String> = futures_collect(&rotator, 5).await;
        assert_eq!(seq, vec!["a", "b", "c", "a", "b"]);
    }

    async fn futures_collect(rotator: &UserAgentRotator, n: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(rotator.next_round_robin().await);
        }
        out
    }

    #[tokio::test]
    async fn disabled_rotation_returns_default() {
        let rotator = UserAgentRotator::new("default-ua", vec!["a".into()], false);
        assert_eq!(rotator.next_round_robin().await, "default-ua");
    }

    #[tokio::test]
    async fn empty_list_returns_default_even_when_enabled() {
        let rotator = UserAgentRotator::new("default-ua", vec![], true);
        assert_eq!(rotator.next_round_robin().await, "default-ua");
    }

    #[test]
    fn random_selection_draws_from_list_when_enabled() {
        let rotator = UserAgentRotator::new("default-ua", vec!["a".into(), "b".into(), "c".into()], true);
        for _ in 0..20 {
            let picked = rotator.random();
            assert!(["a", "b", "c"].contains(&picked.as_str()));
        }
    }

    #[test]
    fn random_selection_returns_default_when_disabled() {
        let rotator = UserAgentRotator::new("default-ua", vec!["a".into()], false);
        assert_eq!(rotator.random(), "default-ua");
    }

    #[test]
    fn classifies_chrome_and_firefox() {
        assert!(is_chrome_class("Mozilla/5.0 Chrome/120.0 Safari/537.36"));
        assert!(!is_chrome_class("Mozilla/5.0 Firefox/120.0"));
        assert!(is_firefox_class("Mozilla/5.0 Firefox/120.0"));
    }
}
