/// A model the user can pick from the model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOption {
    pub id: &'static str,
    pub display_name: &'static str,
    pub subtitle: &'static str,
    pub model_id: &'static str,
    pub supports_reasoning: bool,
}

const FLASH: ModelOption = ModelOption {
    id: "standard",
    display_name: "Flash",
    subtitle: "Instant chat",
    model_id: "gemma3:1b-it-qat",
    supports_reasoning: false,
};

const THINK: ModelOption = ModelOption {
    id: "reasoning",
    display_name: "Think",
    subtitle: "Tools & deep thinking",
    model_id: "qwen3:1.7b",
    supports_reasoning: true,
};

pub const MODEL_OPTIONS: &[ModelOption] = &[FLASH, THINK];

pub const DEFAULT_MODEL_OPTION: ModelOption = FLASH;

/// Model families known to emit a separate thinking channel.
const REASONING_FAMILIES: &[&str] = &["qwen3", "deepseek-r1", "gpt-oss", "magistral", "qwq"];

impl ModelOption {
    pub fn find_by_model_id(model_id: &str) -> Option<&'static ModelOption> {
        MODEL_OPTIONS.iter().find(|o| o.model_id == model_id)
    }

    pub fn find_by_id(id: &str) -> Option<&'static ModelOption> {
        MODEL_OPTIONS.iter().find(|o| o.id == id)
    }
}

/// Whether `model_id` supports reasoning (and therefore tools).
///
/// Catalog entries answer directly; anything else is judged by the family
/// prefix before the `:` tag.
pub fn supports_reasoning(model_id: &str) -> bool {
    if let Some(option) = ModelOption::find_by_model_id(model_id) {
        return option.supports_reasoning;
    }

    let family = model_id
        .split(':')
        .next()
        .unwrap_or(model_id)
        .to_ascii_lowercase();
    REASONING_FAMILIES.iter().any(|f| family.starts_with(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_flags() {
        assert!(!supports_reasoning("gemma3:1b-it-qat"));
        assert!(supports_reasoning("qwen3:1.7b"));
    }

    #[test]
    fn test_family_fallback() {
        assert!(supports_reasoning("qwen3:8b"));
        assert!(supports_reasoning("deepseek-r1:7b"));
        assert!(!supports_reasoning("llama3.2"));
        assert!(!supports_reasoning("gemma3:4b"));
    }

    #[test]
    fn test_lookup() {
        assert_eq!(ModelOption::find_by_id("reasoning").unwrap().model_id, "qwen3:1.7b");
        assert!(ModelOption::find_by_model_id("unknown").is_none());
        assert_eq!(DEFAULT_MODEL_OPTION.id, "standard");
    }
}
