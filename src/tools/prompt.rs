use super::{lang_param, symbol_param};
use crate::catalog::{Arguments, Capability, InputShape};
use crate::models::Language;
use crate::prompts::{analyst_persona, AnalysisKind};
use crate::validators::validate_symbol;
use crate::Result;

/// Renders every analysis template for one asset.
pub struct PromptTemplateCapability;

#[async_trait::async_trait]
impl Capability for PromptTemplateCapability {
    fn name(&self) -> &'static str {
        "build_analysis_prompt"
    }

    fn description(&self) -> &'static str {
        "Build the analysis prompt templates for a crypto asset. Use when a custom analysis framework is needed."
    }

    fn input_shape(&self) -> InputShape {
        InputShape::new(vec![symbol_param(), lang_param()])
    }

    async fn execute(&self, args: &Arguments) -> Result<String> {
        let symbol = validate_symbol(args.str("symbol")?)?;
        let lang = args.language("lang");

        let mut out = format!("{}分析提示词模板（语言：{}）：\n\n", symbol, lang);
        for kind in AnalysisKind::ALL {
            out.push_str(&format!("【{}】\n{}\n\n", kind.key(), kind.template(&symbol, lang)));
        }
        out.push_str(&format!("已构建{}的各种分析提示词模板。", symbol));
        Ok(out)
    }
}

pub struct SystemPromptCapability;

#[async_trait::async_trait]
impl Capability for SystemPromptCapability {
    fn name(&self) -> &'static str {
        "get_system_prompt"
    }

    fn description(&self) -> &'static str {
        "Get the system prompt templates defining the assistant's role and conduct rules."
    }

    fn input_shape(&self) -> InputShape {
        InputShape::empty()
    }

    async fn execute(&self, _args: &Arguments) -> Result<String> {
        Ok(format!(
            "系统提示词模板：\n\n中文系统提示词：\n{}\n\n英文系统提示词：\n{}\n\n已获取中英文系统提示词模板。",
            analyst_persona(Language::Zh),
            analyst_persona(Language::En),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RawArguments;
    use serde_json::json;

    #[tokio::test]
    async fn test_templates_rendered_in_order() {
        let capability = PromptTemplateCapability;
        let args = RawArguments::from_value(json!({"symbol": "sol", "lang": "en"}))
            .normalize(&capability.input_shape())
            .unwrap();
        let output = capability.execute(&args).await.unwrap();

        let technical = output.find("【technical_analysis】").unwrap();
        let summary = output.find("【summary】").unwrap();
        assert!(technical < summary);
        assert!(output.starts_with("SOL分析提示词模板（语言：en）"));
    }

    #[tokio::test]
    async fn test_system_prompt_takes_no_arguments() {
        let capability = SystemPromptCapability;
        let args = RawArguments::Empty.normalize(&capability.input_shape()).unwrap();
        let output = capability.execute(&args).await.unwrap();
        assert!(output.contains("英文系统提示词"));
        assert!(RawArguments::Single(json!("BTC"))
            .normalize(&capability.input_shape())
            .is_err());
    }
}
