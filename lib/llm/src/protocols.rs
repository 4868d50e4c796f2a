// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire types for the `/invocations` endpoint.
//!
//! ```json
//! {"input": ["a", "b"], "max_length": 50, "parameters": {"num_beams": 2}}
//! ```
//!
//! Generation options may appear at the top level, under `parameters`, or
//! both; `parameters` wins when a key is given twice.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// One prompt or an ordered batch; the response mirrors the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextPayload {
    Single(String),
    Batch(Vec<String>),
}

impl TextPayload {
    /// Whether this input carries no text at all.
    ///
    /// A batch of empty strings is not empty; only `""` and `[]` are.
    pub fn is_empty(&self) -> bool {
        match self {
            TextPayload::Single(text) => text.is_empty(),
            TextPayload::Batch(texts) => texts.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TextPayload::Single(_) => 1,
            TextPayload::Batch(texts) => texts.len(),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            TextPayload::Single(text) => vec![text],
            TextPayload::Batch(texts) => texts,
        }
    }

    /// Rebuild a payload with the shape of `self` from `texts`.
    pub fn reshape(&self, mut texts: Vec<String>) -> TextPayload {
        match self {
            TextPayload::Single(_) => TextPayload::Single(texts.pop().unwrap_or_default()),
            TextPayload::Batch(_) => TextPayload::Batch(texts),
        }
    }
}

/// Decoding knobs forwarded to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_lengths"))]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,

    #[serde(default, alias = "max_new_tokens", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0))]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub num_beams: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_repeat_ngram_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stopping: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<bool>,
}

fn validate_lengths(options: &GenerationOptions) -> Result<(), ValidationError> {
    match (options.min_length, options.max_length) {
        (Some(min), Some(max)) if max < min => {
            let mut err = ValidationError::new("length_range");
            err.message = Some(format!("max_length {max} is below min_length {min}").into());
            Err(err)
        }
        _ => Ok(()),
    }
}

impl GenerationOptions {
    /// Fields set in `overrides` replace the ones in `self`.
    pub fn merge(self, overrides: GenerationOptions) -> GenerationOptions {
        GenerationOptions {
            min_length: overrides.min_length.or(self.min_length),
            max_length: overrides.max_length.or(self.max_length),
            temperature: overrides.temperature.or(self.temperature),
            num_beams: overrides.num_beams.or(self.num_beams),
            no_repeat_ngram_size: overrides.no_repeat_ngram_size.or(self.no_repeat_ngram_size),
            do_sample: overrides.do_sample.or(self.do_sample),
            early_stopping: overrides.early_stopping.or(self.early_stopping),
            padding: overrides.padding.or(self.padding),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvocationRequest {
    #[serde(default, alias = "inputs")]
    pub input: Option<TextPayload>,

    #[serde(default)]
    pub parameters: Option<GenerationOptions>,

    #[serde(flatten)]
    pub options: GenerationOptions,
}

impl InvocationRequest {
    /// Warm-up probes carry no text and must not reach the engine.
    pub fn is_warmup(&self) -> bool {
        self.input.as_ref().map_or(true, TextPayload::is_empty)
    }

    /// Top-level options overlaid with `parameters`.
    pub fn effective_options(&self) -> GenerationOptions {
        match &self.parameters {
            Some(parameters) => self.options.clone().merge(parameters.clone()),
            None => self.options.clone(),
        }
    }

    /// Split into the text to generate from and the effective options.
    /// The text is `None` for warm-up requests.
    pub fn into_parts(self) -> (Option<TextPayload>, GenerationOptions) {
        let options = self.effective_options();
        let input = if self.is_warmup() { None } else { self.input };
        (input, options)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationResponse {
    Generated { generated_text: TextPayload },
    /// Serialized as `{}`.
    WarmUp {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(body: &str) -> InvocationRequest {
        serde_json::from_str(body).unwrap()
    }

    #[rstest]
    #[case("{}")]
    #[case(r#"{"input": ""}"#)]
    #[case(r#"{"input": []}"#)]
    #[case(r#"{"input": null}"#)]
    #[case(r#"{"inputs": "", "max_length": 5}"#)]
    fn test_warmup_requests(#[case] body: &str) {
        assert!(parse(body).is_warmup());
    }

    #[rstest]
    #[case(r#"{"input": "hello"}"#, 1)]
    #[case(r#"{"inputs": ["a", "b"]}"#, 2)]
    #[case(r#"{"input": [""]}"#, 1)]
    fn test_real_requests(#[case] body: &str, #[case] len: usize) {
        let request = parse(body);
        assert!(!request.is_warmup());
        assert_eq!(request.input.unwrap().len(), len);
    }

    #[test]
    fn test_into_parts() {
        let (input, options) =
            parse(r#"{"input": [], "parameters": {"max_length": 7}}"#).into_parts();
        assert!(input.is_none());
        assert_eq!(options.max_length, Some(7));

        let (input, options) = parse(r#"{"inputs": ["a"], "num_beams": 2}"#).into_parts();
        assert_eq!(input, Some(TextPayload::Batch(vec!["a".into()])));
        assert_eq!(options.num_beams, Some(2));
    }

    #[test]
    fn test_options_top_level_and_nested() {
        let request = parse(
            r#"{"input": "x", "max_new_tokens": 20, "padding": true,
                "parameters": {"max_length": 30, "num_beams": 4}}"#,
        );
        let options = request.effective_options();
        assert_eq!(options.max_length, Some(30));
        assert_eq!(options.num_beams, Some(4));
        assert_eq!(options.padding, Some(true));
        assert!(options.validate().is_ok());
    }

    #[rstest]
    #[case(r#"{"min_length": 10, "max_length": 5}"#)]
    #[case(r#"{"temperature": -0.5}"#)]
    #[case(r#"{"num_beams": 0}"#)]
    fn test_invalid_options(#[case] body: &str) {
        let options: GenerationOptions = serde_json::from_str(body).unwrap();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_response_shapes() {
        let single = InvocationResponse::Generated {
            generated_text: TextPayload::Single("hi".into()),
        };
        assert_eq!(serde_json::to_string(&single).unwrap(), r#"{"generated_text":"hi"}"#);

        let batch = InvocationResponse::Generated {
            generated_text: TextPayload::Batch(vec!["a".into(), "b".into()]),
        };
        assert_eq!(
            serde_json::to_string(&batch).unwrap(),
            r#"{"generated_text":["a","b"]}"#
        );

        assert_eq!(serde_json::to_string(&InvocationResponse::WarmUp {}).unwrap(), "{}");
    }

    #[test]
    fn test_reshape_follows_input() {
        let single = TextPayload::Single("q".into());
        assert_eq!(single.reshape(vec!["r".into()]), TextPayload::Single("r".into()));

        let batch = TextPayload::Batch(vec!["q1".into(), "q2".into()]);
        assert_eq!(
            batch.reshape(vec!["r1".into(), "r2".into()]),
            TextPayload::Batch(vec!["r1".into(), "r2".into()])
        );
    }
}
