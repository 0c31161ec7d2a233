//! Prompt templates for Samle.
//!
//! The analysis instruction can be customized by placing an `analysis.toml`
//! file in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub analysis: AnalysisPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts sent to the analysis provider alongside the uploaded asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPrompts {
    pub instruction: String,
}

impl Default for AnalysisPrompts {
    fn default() -> Self {
        Self {
            instruction: r#"You are reviewing a recorded conversation supplied as the attached file "{{file_name}}".

Produce a structured report with these sections:
1. Summary: three to five sentences on what the conversation was about
2. Participants: who spoke and in what role, as far as can be inferred
3. Key points: the decisions, commitments and open questions raised
4. Follow-ups: concrete next steps with owners where mentioned

Only report what is present in the recording. If audio is unclear, say so."#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let analysis_path = custom_path.join("analysis.toml");
            if analysis_path.exists() {
                let content = std::fs::read_to_string(&analysis_path)?;
                prompts.analysis = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }

    /// The analysis instruction for a given file.
    pub fn analysis_instruction(&self, file_name: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert("file_name".to_string(), file_name.to_string());
        self.render_with_custom(&self.analysis.instruction, &vars)
    }
}
