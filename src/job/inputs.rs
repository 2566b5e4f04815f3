//! Custom inputs collected before a job starts.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A value the check routine needs from whoever starts the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomInput {
    pub variable_name: String,
    pub description: String,
    pub default_answer: Option<String>,
}

impl CustomInput {
    pub fn new(variable_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            variable_name: variable_name.into(),
            description: description.into(),
            default_answer: None,
        }
    }

    pub fn with_default(mut self, answer: impl Into<String>) -> Self {
        self.default_answer = Some(answer.into());
        self
    }
}

/// Answers custom inputs at start time.
#[async_trait]
pub trait InputProvider: Send + Sync {
    /// `None` falls back to the input's default.
    async fn answer(&self, input: &CustomInput) -> Option<String>;
}

/// Answers from a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticInputs(pub HashMap<String, String>);

impl StaticInputs {
    pub fn new<I, K, V>(answers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            answers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[async_trait]
impl InputProvider for StaticInputs {
    async fn answer(&self, input: &CustomInput) -> Option<String> {
        self.0.get(&input.variable_name).cloned()
    }
}

/// Resolve every input to an answer or its default.
pub async fn collect(
    inputs: &[CustomInput],
    provider: Option<&dyn InputProvider>,
) -> Result<HashMap<String, String>, ConfigError> {
    let mut answers = HashMap::with_capacity(inputs.len());
    for input in inputs {
        let answer = match provider {
            Some(provider) => provider.answer(input).await,
            None => None,
        };
        let value = answer
            .or_else(|| input.default_answer.clone())
            .ok_or_else(|| ConfigError::MissingInput {
                variable: input.variable_name.clone(),
            })?;
        answers.insert(input.variable_name.clone(), value);
    }
    Ok(answers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_override_defaults() {
        let inputs = [
            CustomInput::new("DOMAIN", "Target domain").with_default("example.com"),
            CustomInput::new("REGION", "Region").with_default("eu"),
        ];
        let provider = StaticInputs::new([("DOMAIN", "test.local")]);
        let answers = collect(&inputs, Some(&provider)).await.unwrap();
        assert_eq!(answers["DOMAIN"], "test.local");
        assert_eq!(answers["REGION"], "eu");
    }

    #[tokio::test]
    async fn missing_answer_without_default_fails() {
        let inputs = [CustomInput::new("API_KEY", "Key")];
        let err = collect(&inputs, None).await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingInput { ref variable } if variable == "API_KEY"));
    }
}
