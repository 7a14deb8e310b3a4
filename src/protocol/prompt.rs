//! Runtime option prompts
//!
//! An adapter declares questions the engine should put to an operator
//! (package manager, virtualenv name, ...). Values are typed, and a prompt
//! whose values disagree with its declared type is rejected on both sides.

use serde::{Deserialize, Serialize};

use crate::{LanghostError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeOptionType {
    #[default]
    String,
    Int32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptionValue {
    #[serde(rename = "promptType")]
    pub prompt_type: RuntimeOptionType,
    #[serde(default, rename = "stringValue", skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, rename = "int32Value", skip_serializing_if = "Option::is_none")]
    pub int32_value: Option<i32>,
    #[serde(default, rename = "displayName")]
    pub display_name: String,
}

impl RuntimeOptionValue {
    pub fn string(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            prompt_type: RuntimeOptionType::String,
            display_name: value.clone(),
            string_value: Some(value),
            int32_value: None,
        }
    }

    pub fn int32(value: i32) -> Self {
        Self {
            prompt_type: RuntimeOptionType::Int32,
            string_value: None,
            int32_value: Some(value),
            display_name: value.to_string(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// The populated field matches the declared type, and only that field is set
    fn is_well_typed(&self) -> bool {
        match self.prompt_type {
            RuntimeOptionType::String => self.string_value.is_some() && self.int32_value.is_none(),
            RuntimeOptionType::Int32 => self.int32_value.is_some() && self.string_value.is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptionPrompt {
    pub key: String,
    pub description: String,
    #[serde(rename = "promptType")]
    pub prompt_type: RuntimeOptionType,
    #[serde(default)]
    pub choices: Vec<RuntimeOptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<RuntimeOptionValue>,
}

impl RuntimeOptionPrompt {
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        prompt_type: RuntimeOptionType,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            prompt_type,
            choices: Vec::new(),
            default: None,
        }
    }

    pub fn with_choices(mut self, choices: Vec<RuntimeOptionValue>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_default(mut self, default: RuntimeOptionValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Check that every value carried by the prompt uses the prompt's type.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(LanghostError::Validation(
                "runtime option prompt has an empty key".to_string(),
            ));
        }

        let check = |value: &RuntimeOptionValue, role: &str| -> Result<()> {
            if value.prompt_type != self.prompt_type {
                return Err(LanghostError::Validation(format!(
                    "prompt '{}': {} has type {:?} but the prompt is {:?}",
                    self.key, role, value.prompt_type, self.prompt_type
                )));
            }
            if !value.is_well_typed() {
                return Err(LanghostError::Validation(format!(
                    "prompt '{}': {} does not carry a {:?} value",
                    self.key, role, self.prompt_type
                )));
            }
            Ok(())
        };

        for choice in &self.choices {
            check(choice, "choice")?;
        }
        if let Some(default) = &self.default {
            check(default, "default")?;
        }
        Ok(())
    }
}
