use crate::model::Settings;
use std::env;
use std::time::Duration;

pub const DEFAULT_ACTOR: &str = "promogate";
pub const DEFAULT_LINK_BASE: &str = "/#/applications";

/// Runtime knobs shared by every evaluator.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Identity recorded on judgements, vetoes, pins and submitted tasks.
    pub actor: String,
    /// Retry budget for verifications that don't set their own.
    pub max_retries: u32,
    /// Upper bound for a single call into the task backend.
    pub task_timeout: Duration,
    pub link_base: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            actor: DEFAULT_ACTOR.to_string(),
            max_retries: 0,
            task_timeout: Duration::from_secs(30),
            link_base: DEFAULT_LINK_BASE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut cfg = Self::default();
        if let Some(actor) = settings.actor.as_ref().filter(|a| !a.trim().is_empty()) {
            cfg.actor = actor.clone();
        }
        if let Some(secs) = settings.task_timeout_seconds {
            cfg.task_timeout = Duration::from_secs(secs);
        }
        if let Some(base) = &settings.link_base {
            cfg.link_base = base.trim_end_matches('/').to_string();
        }
        if let Some(n) = settings.verification.as_ref().and_then(|v| v.max_retries) {
            cfg.max_retries = n;
        }
        cfg
    }

    /// Environment variables win over the config file.
    pub fn with_env(mut self) -> Self {
        if let Ok(v) = env::var("PROMOGATE_ACTOR") {
            if !v.trim().is_empty() {
                self.actor = v;
            }
        }
        if let Ok(v) = env::var("PROMOGATE_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.max_retries = n;
            }
        }
        if let Ok(v) = env::var("PROMOGATE_TASK_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.task_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(v) = env::var("PROMOGATE_LINK_BASE") {
            self.link_base = v.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn task_link(&self, application: &str, task_id: &str) -> String {
        format!("{}/{}/tasks/{}", self.link_base, application, task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VerificationSettings;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::from_settings(&Settings::default());
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.actor, "promogate");
        assert_eq!(
            cfg.task_link("demo", "01HX"),
            "/#/applications/demo/tasks/01HX"
        );
    }

    #[test]
    fn test_settings_override_defaults() {
        let settings = Settings {
            actor: Some("release-bot".into()),
            task_timeout_seconds: Some(5),
            link_base: Some("https://deck.example.com/#/applications/".into()),
            verification: Some(VerificationSettings {
                max_retries: Some(3),
            }),
        };
        let cfg = EngineConfig::from_settings(&settings);
        assert_eq!(cfg.actor, "release-bot");
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.task_timeout, Duration::from_secs(5));
        assert_eq!(
            cfg.task_link("demo", "t1"),
            "https://deck.example.com/#/applications/demo/tasks/t1"
        );
    }

    #[test]
    fn test_blank_actor_keeps_default() {
        let settings = Settings {
            actor: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(EngineConfig::from_settings(&settings).actor, DEFAULT_ACTOR);
    }
}
