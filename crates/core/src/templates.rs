//! Workflow templates for the supported generation modalities.
//!
//! Each template is a fixed ComfyUI graph: node ids, edges, sampler and
//! checkpoint defaults are constants. The caller supplies the prompt, which
//! lands verbatim in exactly one text-encoding input, plus optional
//! [`GenerationParams`] overrides. Building is pure and deterministic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::workflow::{WorkflowGraph, WorkflowNode};

// ---------------------------------------------------------------------------
// Image template constants
// ---------------------------------------------------------------------------

/// Node ids of the text-to-image template.
pub mod image_nodes {
    pub const SAMPLER: &str = "3";
    pub const CHECKPOINT: &str = "4";
    pub const LATENT: &str = "5";
    pub const POSITIVE: &str = "6";
    pub const NEGATIVE: &str = "7";
    pub const DECODE: &str = "8";
    pub const SAVE: &str = "9";
}

pub const IMAGE_DEFAULT_CHECKPOINT: &str = "v1-5-pruned-emaonly.safetensors";
pub const IMAGE_DEFAULT_SEED: u64 = 156_680_208_700_286;
pub const IMAGE_DEFAULT_STEPS: u32 = 20;
pub const IMAGE_DEFAULT_CFG: f64 = 8.0;
pub const IMAGE_DEFAULT_NEGATIVE: &str = "text, watermark";
pub const IMAGE_DEFAULT_SIZE: ImageSize = ImageSize {
    width: 512,
    height: 512,
};
const IMAGE_SAMPLER: &str = "euler";
const IMAGE_SCHEDULER: &str = "normal";
const IMAGE_FILENAME_PREFIX: &str = "ComfyUI";

// ---------------------------------------------------------------------------
// Audio template constants
// ---------------------------------------------------------------------------

/// Node ids of the text-to-music template.
pub mod audio_nodes {
    pub const TEXT_ENCODE: &str = "14";
    pub const LATENT: &str = "17";
    pub const DECODE: &str = "18";
    pub const CHECKPOINT: &str = "40";
    pub const ZERO_OUT: &str = "44";
    pub const APPLY_CFG: &str = "49";
    pub const TONEMAP: &str = "50";
    pub const MODEL_SAMPLING: &str = "51";
    pub const SAMPLER: &str = "52";
    pub const SAVE: &str = "59";
}

pub const AUDIO_DEFAULT_CHECKPOINT: &str = "ace_step_v1_3.5b.safetensors";
pub const AUDIO_DEFAULT_SEED: u64 = 851_442_497_278_067;
pub const AUDIO_DEFAULT_STEPS: u32 = 50;
pub const AUDIO_DEFAULT_DURATION_SECS: u32 = 90;
pub const AUDIO_MAX_DURATION_SECS: u32 = 600;
/// Lyrics placeholder for an instrumental track.
pub const AUDIO_DEFAULT_LYRICS: &str = "[inst]";
const AUDIO_CFG: f64 = 5.0;
const AUDIO_LYRICS_STRENGTH: f64 = 0.99;
const AUDIO_SHIFT: f64 = 5.0;
const AUDIO_SAMPLER: &str = "euler";
const AUDIO_SCHEDULER: &str = "simple";
const AUDIO_FILENAME_PREFIX: &str = "audio/ComfyUI";

// ---------------------------------------------------------------------------
// Modality
// ---------------------------------------------------------------------------

/// What kind of artifact a workflow produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Image,
    Audio,
}

/// Where a template's artifact appears in the backend history record:
/// `outputs[node_id][output_key][0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLocator {
    pub node_id: &'static str,
    pub output_key: &'static str,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }

    /// Location of the saved artifact in the history record.
    pub fn output_locator(self) -> OutputLocator {
        match self {
            Self::Image => OutputLocator {
                node_id: image_nodes::SAVE,
                output_key: "images",
            },
            Self::Audio => OutputLocator {
                node_id: audio_nodes::SAVE,
                output_key: "audio",
            },
        }
    }

    /// `(node_id, input_name)` of the input that receives the prompt.
    pub fn prompt_input(self) -> (&'static str, &'static str) {
        match self {
            Self::Image => (image_nodes::POSITIVE, "text"),
            Self::Audio => (audio_nodes::TEXT_ENCODE, "tags"),
        }
    }

    /// File extension used when the artifact name carries none.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Image => "png",
            Self::Audio => "mp3",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            other => Err(WorkflowError::InvalidParameter {
                name: "modality",
                reason: format!("unknown modality '{other}'"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Latent image dimensions in pixels. Both sides are positive multiples of 8.
///
/// Deserialization goes through [`ImageSize::new`], so a decoded value
/// holds the same invariant as a constructed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawImageSize")]
pub struct ImageSize {
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct RawImageSize {
    width: u32,
    height: u32,
}

impl TryFrom<RawImageSize> for ImageSize {
    type Error = WorkflowError;

    fn try_from(raw: RawImageSize) -> Result<Self, Self::Error> {
        Self::new(raw.width, raw.height)
    }
}

impl ImageSize {
    pub const SQUARE: ImageSize = ImageSize {
        width: 1024,
        height: 1024,
    };
    pub const LANDSCAPE: ImageSize = ImageSize {
        width: 1792,
        height: 1024,
    };
    pub const PORTRAIT: ImageSize = ImageSize {
        width: 1024,
        height: 1792,
    };

    pub fn new(width: u32, height: u32) -> Result<Self, WorkflowError> {
        for side in [width, height] {
            if side == 0 || side % 8 != 0 {
                return Err(WorkflowError::InvalidParameter {
                    name: "size",
                    reason: format!("{width}x{height}: sides must be positive multiples of 8"),
                });
            }
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parses `WIDTHxHEIGHT`, e.g. `1024x1792`.
impl FromStr for ImageSize {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WorkflowError::InvalidParameter {
            name: "size",
            reason: format!("'{s}' is not of the form WIDTHxHEIGHT"),
        };
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse().map_err(|_| invalid())?;
        let height = h.trim().parse().map_err(|_| invalid())?;
        Self::new(width, height)
    }
}

/// Rendering style for images; selects the sampler's CFG scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStyle {
    /// Hyper-real and dramatic.
    Vivid,
    /// Closer to the prompt's literal description, less saturated.
    Natural,
}

impl ImageStyle {
    pub fn cfg(self) -> f64 {
        match self {
            Self::Vivid => 8.0,
            Self::Natural => 6.0,
        }
    }
}

impl FromStr for ImageStyle {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vivid" => Ok(Self::Vivid),
            "natural" => Ok(Self::Natural),
            other => Err(WorkflowError::InvalidParameter {
                name: "style",
                reason: format!("unknown style '{other}'"),
            }),
        }
    }
}

/// Optional per-call overrides of template defaults.
///
/// Fields that do not apply to the chosen modality are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Checkpoint filename replacing the template's default model.
    pub model: Option<String>,
    /// Image only.
    pub size: Option<ImageSize>,
    /// Image only.
    pub style: Option<ImageStyle>,
    pub seed: Option<u64>,
    /// Audio only; `1..=600`.
    pub duration_seconds: Option<u32>,
    /// Image only.
    pub negative_prompt: Option<String>,
    /// Audio only.
    pub lyrics: Option<String>,
}

impl GenerationParams {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_size(mut self, size: ImageSize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_style(mut self, style: ImageStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    pub fn with_lyrics(mut self, lyrics: impl Into<String>) -> Self {
        self.lyrics = Some(lyrics.into());
        self
    }

    fn checkpoint<'a>(&'a self, default: &'a str) -> Result<&'a str, WorkflowError> {
        match self.model.as_deref() {
            Some(model) if model.trim().is_empty() => Err(WorkflowError::InvalidParameter {
                name: "model",
                reason: "checkpoint name must not be blank".to_string(),
            }),
            Some(model) => Ok(model),
            None => Ok(default),
        }
    }

    fn duration(&self) -> Result<u32, WorkflowError> {
        let seconds = self.duration_seconds.unwrap_or(AUDIO_DEFAULT_DURATION_SECS);
        if seconds == 0 || seconds > AUDIO_MAX_DURATION_SECS {
            return Err(WorkflowError::InvalidParameter {
                name: "duration_seconds",
                reason: format!("{seconds}s is outside 1..={AUDIO_MAX_DURATION_SECS}"),
            });
        }
        Ok(seconds)
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Reject blank prompts. The only input check applied to the prompt text.
pub fn validate_prompt(prompt: &str) -> Result<(), WorkflowError> {
    if prompt.trim().is_empty() {
        return Err(WorkflowError::EmptyPrompt);
    }
    Ok(())
}

/// Build the workflow for `modality`.
pub fn build(
    modality: Modality,
    prompt: &str,
    params: &GenerationParams,
) -> Result<WorkflowGraph, WorkflowError> {
    match modality {
        Modality::Image => build_image(prompt, params),
        Modality::Audio => build_audio(prompt, params),
    }
}

/// Text-to-image: checkpoint → CLIP encode (±) → KSampler → VAE decode → save.
pub fn build_image(prompt: &str, params: &GenerationParams) -> Result<WorkflowGraph, WorkflowError> {
    use self::image_nodes::*;

    validate_prompt(prompt)?;
    let checkpoint = params.checkpoint(IMAGE_DEFAULT_CHECKPOINT)?;
    let size = params.size.unwrap_or(IMAGE_DEFAULT_SIZE);
    let cfg = params.style.map_or(IMAGE_DEFAULT_CFG, ImageStyle::cfg);
    let negative = params
        .negative_prompt
        .as_deref()
        .unwrap_or(IMAGE_DEFAULT_NEGATIVE);

    let mut graph = WorkflowGraph::new();
    graph.insert(
        SAMPLER,
        WorkflowNode::new("KSampler", "KSampler")
            .with_input("seed", params.seed.unwrap_or(IMAGE_DEFAULT_SEED))
            .with_input("steps", IMAGE_DEFAULT_STEPS)
            .with_input("cfg", cfg)
            .with_input("sampler_name", IMAGE_SAMPLER)
            .with_input("scheduler", IMAGE_SCHEDULER)
            .with_input("denoise", 1.0)
            .with_link("model", CHECKPOINT, 0)
            .with_link("positive", POSITIVE, 0)
            .with_link("negative", NEGATIVE, 0)
            .with_link("latent_image", LATENT, 0),
    );
    graph.insert(
        CHECKPOINT,
        WorkflowNode::new("CheckpointLoaderSimple", "Load Checkpoint")
            .with_input("ckpt_name", checkpoint),
    );
    graph.insert(
        LATENT,
        WorkflowNode::new("EmptyLatentImage", "Empty Latent Image")
            .with_input("width", size.width())
            .with_input("height", size.height())
            .with_input("batch_size", 1),
    );
    graph.insert(
        POSITIVE,
        WorkflowNode::new("CLIPTextEncode", "CLIP Text Encode (Prompt)")
            .with_input("text", prompt)
            .with_link("clip", CHECKPOINT, 1),
    );
    graph.insert(
        NEGATIVE,
        WorkflowNode::new("CLIPTextEncode", "CLIP Text Encode (Negative)")
            .with_input("text", negative)
            .with_link("clip", CHECKPOINT, 1),
    );
    graph.insert(
        DECODE,
        WorkflowNode::new("VAEDecode", "VAE Decode")
            .with_link("samples", SAMPLER, 0)
            .with_link("vae", CHECKPOINT, 2),
    );
    graph.insert(
        SAVE,
        WorkflowNode::new("SaveImage", "Save Image")
            .with_input("filename_prefix", IMAGE_FILENAME_PREFIX)
            .with_link("images", DECODE, 0),
    );

    graph.validate()?;
    Ok(graph)
}

/// Text-to-music with ACE-Step: the prompt becomes the style tags of the
/// text encoder; lyrics default to an instrumental marker.
pub fn build_audio(prompt: &str, params: &GenerationParams) -> Result<WorkflowGraph, WorkflowError> {
    use self::audio_nodes::*;

    validate_prompt(prompt)?;
    let checkpoint = params.checkpoint(AUDIO_DEFAULT_CHECKPOINT)?;
    let seconds = params.duration()?;
    let lyrics = params.lyrics.as_deref().unwrap_or(AUDIO_DEFAULT_LYRICS);

    let mut graph = WorkflowGraph::new();
    graph.insert(
        TEXT_ENCODE,
        WorkflowNode::new("TextEncodeAceStepAudio", "TextEncodeAceStepAudio")
            .with_input("tags", prompt)
            .with_input("lyrics", lyrics)
            .with_input("lyrics_strength", AUDIO_LYRICS_STRENGTH)
            .with_link("clip", CHECKPOINT, 1),
    );
    graph.insert(
        LATENT,
        WorkflowNode::new("EmptyAceStepLatentAudio", "EmptyAceStepLatentAudio")
            .with_input("seconds", seconds)
            .with_input("batch_size", 1),
    );
    graph.insert(
        DECODE,
        WorkflowNode::new("VAEDecodeAudio", "VAEDecodeAudio")
            .with_link("samples", SAMPLER, 0)
            .with_link("vae", CHECKPOINT, 2),
    );
    graph.insert(
        CHECKPOINT,
        WorkflowNode::new("CheckpointLoaderSimple", "Load Checkpoint")
            .with_input("ckpt_name", checkpoint),
    );
    graph.insert(
        ZERO_OUT,
        WorkflowNode::new("ConditioningZeroOut", "ConditioningZeroOut")
            .with_link("conditioning", TEXT_ENCODE, 0),
    );
    graph.insert(
        APPLY_CFG,
        WorkflowNode::new("LatentApplyOperationCFG", "LatentApplyOperationCFG")
            .with_link("model", MODEL_SAMPLING, 0)
            .with_link("operation", TONEMAP, 0),
    );
    graph.insert(
        TONEMAP,
        WorkflowNode::new("LatentOperationTonemapReinhard", "LatentOperationTonemapReinhard")
            .with_input("multiplier", 1.0),
    );
    graph.insert(
        MODEL_SAMPLING,
        WorkflowNode::new("ModelSamplingSD3", "ModelSamplingSD3")
            .with_input("shift", AUDIO_SHIFT)
            .with_link("model", CHECKPOINT, 0),
    );
    graph.insert(
        SAMPLER,
        WorkflowNode::new("KSampler", "KSampler")
            .with_input("seed", params.seed.unwrap_or(AUDIO_DEFAULT_SEED))
            .with_input("steps", AUDIO_DEFAULT_STEPS)
            .with_input("cfg", AUDIO_CFG)
            .with_input("sampler_name", AUDIO_SAMPLER)
            .with_input("scheduler", AUDIO_SCHEDULER)
            .with_input("denoise", 1.0)
            .with_link("model", APPLY_CFG, 0)
            .with_link("positive", TEXT_ENCODE, 0)
            .with_link("negative", ZERO_OUT, 0)
            .with_link("latent_image", LATENT, 0),
    );
    graph.insert(
        SAVE,
        WorkflowNode::new("SaveAudioMP3", "Save Audio (MP3)")
            .with_input("filename_prefix", AUDIO_FILENAME_PREFIX)
            .with_input("quality", "V0")
            .with_input("audioUI", "")
            .with_link("audio", DECODE, 0),
    );

    graph.validate()?;
    Ok(graph)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
