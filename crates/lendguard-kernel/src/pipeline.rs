use lendguard_control::PipelineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    RateLimit,
    Session,
    InputValidation,
    Risk,
}

impl PipelineStep {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "rate_limit" | "rate-limit" | "rateLimit" => Some(Self::RateLimit),
            "session" => Some(Self::Session),
            "input_validation" | "input-validation" | "inputValidation" | "validation" => {
                Some(Self::InputValidation)
            }
            "risk" | "risk_score" | "risk-score" => Some(Self::Risk),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Session => "session",
            Self::InputValidation => "input_validation",
            Self::Risk => "risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPipeline {
    pub steps: Vec<PipelineStep>,
}

impl SecurityPipeline {
    /// Unknown names are skipped and repeats keep their first position. A
    /// list with nothing usable falls back to the default order.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let steps = parse_steps(&config.steps);
        if steps.is_empty() {
            return Self::default();
        }
        Self { steps }
    }
}

impl Default for SecurityPipeline {
    fn default() -> Self {
        Self {
            steps: default_steps(),
        }
    }
}

fn parse_steps(values: &[String]) -> Vec<PipelineStep> {
    let mut steps = Vec::new();
    for step in values.iter().filter_map(|value| PipelineStep::parse(value)) {
        if !steps.contains(&step) {
            steps.push(step);
        }
    }
    steps
}

pub fn default_steps() -> Vec<PipelineStep> {
    vec![
        PipelineStep::RateLimit,
        PipelineStep::Session,
        PipelineStep::InputValidation,
        PipelineStep::Risk,
    ]
}
