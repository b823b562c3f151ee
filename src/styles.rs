use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NEGATIVE_PROMPT: &str =
    "nude, naked, nsfw, bad quality, blurry, deformed, unrealistic";
pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.5;
pub const DEFAULT_IMAGE_GUIDANCE_SCALE: f32 = 1.3;
pub const DEFAULT_INFERENCE_STEPS: u32 = 50;
pub const DEFAULT_NUM_OUTPUTS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Face,
    UpperBody,
    Full,
}

impl Position {
    pub fn as_str(self) -> &'static str {
        match self {
            Position::Face => "face",
            Position::UpperBody => "upper_body",
            Position::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Astronaut,
    Cyberpunk,
    Superhero,
}

/// Fixed generation settings for one style.
#[derive(Debug, Clone, Copy)]
pub struct StyleConfig {
    pub prompt: &'static str,
    pub image_guidance_scale: f32,
    pub position: Position,
    pub negative_prompt: &'static str,
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
}

impl Style {
    pub const ALL: [Style; 3] = [Style::Astronaut, Style::Cyberpunk, Style::Superhero];

    pub fn key(self) -> &'static str {
        match self {
            Style::Astronaut => "astronaut",
            Style::Cyberpunk => "cyberpunk",
            Style::Superhero => "superhero",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Style::Astronaut => "🚀 Astronaut",
            Style::Cyberpunk => "🌃 Cyberpunk",
            Style::Superhero => "🦸 Superhero",
        }
    }

    pub fn from_key(key: &str) -> Option<Style> {
        Style::ALL
            .into_iter()
            .find(|style| style.key().eq_ignore_ascii_case(key.trim()))
    }

    pub fn config(self) -> StyleConfig {
        match self {
            Style::Astronaut => StyleConfig {
                prompt: "professional portrait photograph of the same person as an astronaut, wearing astronaut helmet, epic lighting, cinematic composition, 8k uhd, highly detailed, photorealistic",
                image_guidance_scale: 1.5,
                position: Position::Face,
                negative_prompt: DEFAULT_NEGATIVE_PROMPT,
                guidance_scale: DEFAULT_GUIDANCE_SCALE,
                num_inference_steps: DEFAULT_INFERENCE_STEPS,
            },
            Style::Cyberpunk => StyleConfig {
                prompt: "professional portrait of the same person, cyberpunk style, neon city background, moody lighting, highly detailed, vibrant neon accents, cinematic quality, 8k uhd, photorealistic",
                image_guidance_scale: 1.2,
                position: Position::Full,
                negative_prompt: DEFAULT_NEGATIVE_PROMPT,
                guidance_scale: DEFAULT_GUIDANCE_SCALE,
                num_inference_steps: DEFAULT_INFERENCE_STEPS,
            },
            Style::Superhero => StyleConfig {
                prompt: "professional portrait of the same person as a superhero, dynamic lighting, city background, dramatic atmosphere, detailed costume design, cinematic quality, 8k uhd, photorealistic",
                image_guidance_scale: 1.3,
                position: Position::UpperBody,
                negative_prompt: DEFAULT_NEGATIVE_PROMPT,
                guidance_scale: DEFAULT_GUIDANCE_SCALE,
                num_inference_steps: DEFAULT_INFERENCE_STEPS,
            },
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Fast,
    #[default]
    Balanced,
    High,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 3] =
        [QualityPreset::Fast, QualityPreset::Balanced, QualityPreset::High];

    pub fn key(self) -> &'static str {
        match self {
            QualityPreset::Fast => "fast",
            QualityPreset::Balanced => "balanced",
            QualityPreset::High => "high",
        }
    }

    pub fn from_key(key: &str) -> Option<QualityPreset> {
        QualityPreset::ALL
            .into_iter()
            .find(|preset| preset.key().eq_ignore_ascii_case(key.trim()))
    }

    /// Unknown or missing names resolve to `Balanced`.
    pub fn from_key_or_default(key: Option<&str>) -> QualityPreset {
        key.and_then(QualityPreset::from_key).unwrap_or_default()
    }

    pub fn num_inference_steps(self) -> u32 {
        match self {
            QualityPreset::Fast => 30,
            QualityPreset::Balanced => 50,
            QualityPreset::High => 75,
        }
    }

    pub fn guidance_scale(self) -> f32 {
        match self {
            QualityPreset::Fast => 7.0,
            QualityPreset::Balanced => 7.5,
            QualityPreset::High => 8.0,
        }
    }

    pub fn image_guidance_scale(self) -> f32 {
        match self {
            QualityPreset::Fast => 1.2,
            QualityPreset::Balanced => 1.3,
            QualityPreset::High => 1.5,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            QualityPreset::Fast => "Quick generation with basic quality",
            QualityPreset::Balanced => "Good balance between speed and quality",
            QualityPreset::High => "Best quality, takes longer",
        }
    }

    pub fn estimated_seconds(self) -> u64 {
        estimate_generation_seconds(self.num_inference_steps())
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

const BASE_GENERATION_SECONDS: u64 = 15;
// 0.3 s per inference step, kept in tenths to stay in integers.
const STEP_TENTHS_OF_SECOND: u64 = 3;

pub fn estimate_generation_seconds(steps: u32) -> u64 {
    BASE_GENERATION_SECONDS + u64::from(steps) * STEP_TENTHS_OF_SECOND / 10
}

/// Parameters sent to the provider for one submission.
///
/// Optional fields fall back to the submitter's defaults when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_guidance_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_outputs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityPreset>,
}

impl GenerationParams {
    #[cfg(test)]
    pub fn prompt_only(prompt: impl Into<String>) -> Self {
        GenerationParams {
            prompt: prompt.into(),
            negative_prompt: None,
            guidance_scale: None,
            image_guidance_scale: None,
            position: None,
            num_inference_steps: None,
            num_outputs: None,
            quality: None,
        }
    }

    pub fn estimated_seconds(&self) -> u64 {
        estimate_generation_seconds(self.num_inference_steps.unwrap_or(DEFAULT_INFERENCE_STEPS))
    }

    /// Style defaults before any quality preset is applied.
    pub fn from_style(style: Style) -> Self {
        let config = style.config();
        GenerationParams {
            prompt: config.prompt.to_string(),
            negative_prompt: Some(config.negative_prompt.to_string()),
            guidance_scale: Some(config.guidance_scale),
            image_guidance_scale: Some(config.image_guidance_scale),
            position: Some(config.position),
            num_inference_steps: Some(config.num_inference_steps),
            num_outputs: None,
            quality: None,
        }
    }

    pub fn with_preset(mut self, preset: QualityPreset) -> Self {
        self.num_inference_steps = Some(preset.num_inference_steps());
        self.guidance_scale = Some(preset.guidance_scale());
        self.image_guidance_scale = Some(preset.image_guidance_scale());
        self.quality = Some(preset);
        self
    }

    pub fn with_outputs(mut self, num_outputs: u32) -> Self {
        self.num_outputs = Some(num_outputs.max(1));
        self
    }
}

pub fn resolve_generation_params(
    style: Style,
    preset: QualityPreset,
    num_outputs: u32,
) -> GenerationParams {
    GenerationParams::from_style(style)
        .with_preset(preset)
        .with_outputs(num_outputs)
}
