use serde::{Deserialize, Serialize};

/// Model tiers. Callers pick a tier; the client maps it to a concrete model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    /// Cheap, fast tier for targeted section edits.
    Speed,
    /// Stronger tier for review and section writing.
    Smart,
}

/// Maximum tokens for all model tiers
const MODEL_MAX_TOKENS: u32 = 16_000;

impl Model {
    pub fn default_id(&self) -> &'static str {
        match self {
            Model::Speed => "openai/gpt-4o-mini",
            Model::Smart => "anthropic/claude-sonnet-4",
        }
    }

    pub fn max_tokens(&self) -> u32 {
        MODEL_MAX_TOKENS
    }
}

/// Concrete model ids per tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIds {
    pub speed: String,
    pub smart: String,
}

impl Default for ModelIds {
    fn default() -> Self {
        Self {
            speed: Model::Speed.default_id().to_string(),
            smart: Model::Smart.default_id().to_string(),
        }
    }
}

impl ModelIds {
    pub fn id(&self, model: Model) -> &str {
        match model {
            Model::Speed => &self.speed,
            Model::Smart => &self.smart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ids_default_per_tier() {
        let ids = ModelIds::default();
        assert_eq!(ids.id(Model::Speed), Model::Speed.default_id());
        assert_eq!(ids.id(Model::Smart), Model::Smart.default_id());
    }

    #[test]
    fn test_model_max_tokens() {
        assert_eq!(Model::Speed.max_tokens(), MODEL_MAX_TOKENS);
        assert_eq!(Model::Smart.max_tokens(), MODEL_MAX_TOKENS);
    }
}
