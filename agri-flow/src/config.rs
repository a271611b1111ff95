use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tracing::info;

use crate::{
    error::{FlowError, Result},
    gateway::ToolName,
};

/// Environment variable pointing at a YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "AGRI_FLOW_CONFIG";

/// Top-level configuration for the orchestrator.
///
/// Every section has defaults, so an empty YAML document is a valid
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub gateway: GatewayConfig,
    pub router: RouterConfig,
    pub loop_guard: LoopGuardConfig,
    pub intent: IntentConfig,
    pub endpoints: ToolEndpoints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Total attempts per invocation, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub health_check: bool,
    pub timeouts: ToolTimeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolTimeouts {
    pub classify_secs: u64,
    pub prescribe_secs: u64,
    pub insure_secs: u64,
    pub find_vendor_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub max_hops_per_turn: u32,
    pub min_disease_confidence: f32,
    pub max_extraction_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopGuardConfig {
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    pub refinement_enabled: bool,
    pub model: String,
    pub refinement_timeout_secs: u64,
}

/// Base URLs of the external capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolEndpoints {
    pub classifier: String,
    pub prescriber: String,
    pub insurance: String,
    pub vendors: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            health_check: false,
            timeouts: ToolTimeouts::default(),
        }
    }
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            classify_secs: 30,
            prescribe_secs: 45,
            insure_secs: 30,
            find_vendor_secs: 15,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_hops_per_turn: 6,
            min_disease_confidence: 0.5,
            max_extraction_attempts: 3,
        }
    }
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            refinement_enabled: true,
            model: "openai/gpt-4o-mini".to_string(),
            refinement_timeout_secs: 10,
        }
    }
}

impl Default for ToolEndpoints {
    fn default() -> Self {
        Self {
            classifier: "http://localhost:8001".to_string(),
            prescriber: "http://localhost:8002".to_string(),
            insurance: "http://localhost:8003".to_string(),
            vendors: "http://localhost:8004".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn timeout_for(&self, tool: ToolName) -> Duration {
        let secs = match tool {
            ToolName::Classify => self.timeouts.classify_secs,
            ToolName::Prescribe => self.timeouts.prescribe_secs,
            ToolName::Insure => self.timeouts.insure_secs,
            ToolName::FindVendor => self.timeouts.find_vendor_secs,
        };
        Duration::from_secs(secs)
    }
}

impl IntentConfig {
    pub fn refinement_timeout(&self) -> Duration {
        Duration::from_secs(self.refinement_timeout_secs)
    }
}

impl FlowConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: FlowConfig =
            serde_yaml::from_str(yaml).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loading configuration file");
        Self::from_yaml_str(&yaml)
    }

    /// Load from the file named by `AGRI_FLOW_CONFIG`, or fall back to defaults.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) => {
                info!("{} not set, using default configuration", CONFIG_PATH_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.max_attempts == 0 {
            return Err(FlowError::Config(
                "gateway.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.loop_guard.threshold < 2 {
            return Err(FlowError::Config(
                "loop_guard.threshold must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.router.min_disease_confidence) {
            return Err(FlowError::Config(
                "router.min_disease_confidence must be within [0, 1]".to_string(),
            ));
        }
        if self.router.max_hops_per_turn == 0 {
            return Err(FlowError::Config(
                "router.max_hops_per_turn must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
