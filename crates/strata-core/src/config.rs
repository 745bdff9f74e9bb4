use serde::{Deserialize, Serialize};

use crate::color::ColorProfile;
use crate::error::{StrataError, StrataResult};

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker execution contexts.
    pub workers: usize,
    pub task_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub backoff_base_ms: u64,
    /// Queued tasks beyond this are rejected.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            task_timeout_ms: 30_000,
            max_retries: 3,
            backoff: BackoffPolicy::Exponential,
            backoff_base_ms: 50,
            queue_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        match self.backoff {
            BackoffPolicy::Fixed => self.backoff_base_ms,
            BackoffPolicy::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.backoff_base_ms.saturating_mul(1u64 << shift)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoalesceConfig {
    pub window_ms: u64,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        // One display refresh.
        Self { window_ms: 16 }
    }
}

/// Where shader passes execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    /// GPU when an adapter is found, software kernels otherwise.
    #[default]
    Auto,
    /// GPU only; workers fail to render without an adapter.
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub profile: ColorProfile,
    /// Tap stride used by blur passes of interactive renders.
    pub interactive_blur_stride: u32,
    pub backend: RenderBackend,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            profile: ColorProfile::Standard,
            interactive_blur_stride: 2,
            backend: RenderBackend::Auto,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub warm_on_prepare: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            warm_on_prepare: true,
        }
    }
}

/// Engine configuration, usually read from `strata.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub coalesce: CoalesceConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub shaders: ShaderConfig,
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> StrataResult<Self> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| StrataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &std::path::Path) -> StrataResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> StrataResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| StrataError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.scheduler.workers == 0 {
            return Err(StrataError::Config(
                "scheduler.workers must be at least 1".into(),
            ));
        }
        if self.scheduler.queue_capacity == 0 {
            return Err(StrataError::Config(
                "scheduler.queue_capacity must be at least 1".into(),
            ));
        }
        if self.coalesce.window_ms == 0 {
            return Err(StrataError::Config(
                "coalesce.window_ms must be at least 1".into(),
            ));
        }
        if self.render.interactive_blur_stride == 0 {
            return Err(StrataError::Config(
                "render.interactive_blur_stride must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.workers, 1);
        assert_eq!(config.scheduler.task_timeout_ms, 30_000);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.coalesce.window_ms, 16);
        assert_eq!(config.render.backend, RenderBackend::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [scheduler]
            workers = 2
            backoff = "fixed"

            [render]
            profile = "wide-gamut"
            backend = "cpu"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.scheduler.backoff, BackoffPolicy::Fixed);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.render.profile, ColorProfile::WideGamut);
        assert_eq!(config.render.backend, RenderBackend::Cpu);
        assert!(config.shaders.warm_on_prepare);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str("[scheduler]\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
        let err = EngineConfig::from_toml_str("[coalesce]\nwindow_ms = 0\n").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
        let err = EngineConfig::from_toml_str("[scheduler]\nworkers = \"many\"\n").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }

    #[test]
    fn test_backoff_delays() {
        let mut sched = SchedulerConfig::default();
        assert_eq!(sched.backoff_delay_ms(1), 50);
        assert_eq!(sched.backoff_delay_ms(2), 100);
        assert_eq!(sched.backoff_delay_ms(3), 200);
        sched.backoff = BackoffPolicy::Fixed;
        assert_eq!(sched.backoff_delay_ms(3), 50);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("strata-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("strata.toml");
        let mut config = EngineConfig::default();
        config.scheduler.max_retries = 5;
        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.scheduler.max_retries, 5);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
