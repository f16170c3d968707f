use serde::{Deserialize, Serialize};

use crate::{NetErr, Result};

/// Channels of the images the network classifies.
pub const INPUT_CHANNELS: usize = 3;
/// Channels produced by the stem convolution.
pub const STEM_CHANNELS: usize = 32;
/// Channels the head projection expects, the last stage must produce exactly these.
pub const HEAD_IN: usize = 320;
pub const HEAD_CHANNELS: usize = 1280;
/// Smallest final feature map the head pool accepts.
pub const HEAD_POOL_WINDOW: usize = 4;
pub const DEFAULT_NUM_CLASSES: usize = 1000;
/// Most blocks a single stage may repeat.
pub const MAX_STAGE_BLOCKS: usize = 1024;

/// The stage schedule of the reference architecture.
pub const V1_STAGES: [StageSpec; 7] = [
    StageSpec::new(16, 1, 1, 1),
    StageSpec::new(24, 2, 2, 6),
    StageSpec::new(32, 3, 2, 6),
    StageSpec::new(64, 4, 2, 6),
    StageSpec::new(96, 3, 1, 6),
    StageSpec::new(160, 3, 2, 6),
    StageSpec::new(320, 1, 1, 6),
];

/// The specification of a single stage of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// The target channels every block of the stage outputs.
    pub channels: usize,
    pub blocks: usize,
    /// Applied by the first block only.
    pub stride: usize,
    pub expansion: usize,
}

impl StageSpec {
    pub const fn new(channels: usize, blocks: usize, stride: usize, expansion: usize) -> Self {
        Self {
            channels,
            blocks,
            stride,
            expansion,
        }
    }
}

/// How the head reduces the final feature map before the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadPoolSpec {
    /// Averages the whole map, which must be at least `HEAD_POOL_WINDOW` cells wide.
    #[default]
    Global,
    /// A literal sliding average, every remaining cell ends up in the flattened output.
    Window { kernel: usize, stride: usize },
}

/// The configuration of a `MobDenseNet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub num_classes: usize,
    pub stages: Vec<StageSpec>,
    pub head_pool: HeadPoolSpec,
    pub seed: Option<u64>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            num_classes: DEFAULT_NUM_CLASSES,
            stages: V1_STAGES.to_vec(),
            head_pool: HeadPoolSpec::default(),
            seed: None,
        }
    }
}

impl NetConfig {
    /// Creates the reference configuration with a custom amount of classes.
    pub fn with_classes(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Default::default()
        }
    }

    /// Parses a configuration from json, missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value is inside its domain.
    ///
    /// Channel arithmetic between stages is not checked here, it's done while building, where
    /// widths too large to allocate are rejected too.
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(NetErr::InvalidConfig(
                "the classifier needs at least one class".into(),
            ));
        }

        if self.stages.is_empty() {
            return Err(NetErr::InvalidConfig(
                "the network needs at least one stage".into(),
            ));
        }

        for (i, stage) in self.stages.iter().enumerate() {
            let StageSpec {
                channels,
                blocks,
                stride,
                expansion,
            } = *stage;

            if channels == 0 || blocks == 0 || stride == 0 || expansion == 0 {
                return Err(NetErr::InvalidConfig(format!(
                    "stage {i}: channels ({channels}), blocks ({blocks}), stride ({stride}) \
                     and expansion ({expansion}) must be positive"
                )));
            }

            if blocks > MAX_STAGE_BLOCKS {
                return Err(NetErr::InvalidConfig(format!(
                    "stage {i}: {blocks} blocks exceed the limit of {MAX_STAGE_BLOCKS}"
                )));
            }
        }

        if let HeadPoolSpec::Window { kernel, stride } = self.head_pool {
            if kernel == 0 || stride == 0 {
                return Err(NetErr::InvalidConfig(format!(
                    "head pool: kernel ({kernel}) and stride ({stride}) must be positive"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_the_reference_schedule() {
        let config = NetConfig::default();

        let channels: Vec<_> = config.stages.iter().map(|s| s.channels).collect();
        let blocks: Vec<_> = config.stages.iter().map(|s| s.blocks).collect();
        let strides: Vec<_> = config.stages.iter().map(|s| s.stride).collect();
        let expansions: Vec<_> = config.stages.iter().map(|s| s.expansion).collect();

        assert_eq!(channels, [16, 24, 32, 64, 96, 160, 320]);
        assert_eq!(blocks, [1, 2, 3, 4, 3, 3, 1]);
        assert_eq!(strides, [1, 2, 2, 2, 1, 2, 1]);
        assert_eq!(expansions, [1, 6, 6, 6, 6, 6, 6]);
        assert_eq!(config.num_classes, 1000);
        assert_eq!(config.head_pool, HeadPoolSpec::Global);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = NetConfig::from_json(r#"{ "num_classes": 10, "seed": 42 }"#).unwrap();

        assert_eq!(config.num_classes, 10);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.stages, V1_STAGES);
    }

    #[test]
    fn window_head_pool_from_json() {
        let json = r#"{ "head_pool": { "window": { "kernel": 4, "stride": 1 } } }"#;
        let config = NetConfig::from_json(json).unwrap();

        assert_eq!(
            config.head_pool,
            HeadPoolSpec::Window {
                kernel: 4,
                stride: 1
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            NetConfig::from_json(r#"{ "num_classes": 0 }"#),
            Err(NetErr::InvalidConfig(_))
        ));
        assert!(matches!(
            NetConfig::from_json(r#"{ "stages": [] }"#),
            Err(NetErr::InvalidConfig(_))
        ));

        let json = r#"{ "stages": [{ "channels": 320, "blocks": 1, "stride": 0, "expansion": 6 }] }"#;
        assert!(matches!(
            NetConfig::from_json(json),
            Err(NetErr::InvalidConfig(_))
        ));

        let json = r#"{ "head_pool": { "window": { "kernel": 0, "stride": 1 } } }"#;
        assert!(matches!(
            NetConfig::from_json(json),
            Err(NetErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn absurd_block_counts_are_rejected() {
        let json = r#"{ "stages": [{ "channels": 320, "blocks": 100000000000000000, "stride": 1, "expansion": 1 }] }"#;
        assert!(matches!(
            NetConfig::from_json(json),
            Err(NetErr::InvalidConfig(_))
        ));

        let mut config = NetConfig::default();
        config.stages[6].blocks = MAX_STAGE_BLOCKS;
        assert!(config.validate().is_ok());
        config.stages[6].blocks = MAX_STAGE_BLOCKS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            NetConfig::from_json("{ num_classes: }"),
            Err(NetErr::Parse(_))
        ));
    }

    #[test]
    fn serializes_back_to_json() {
        let config = NetConfig::with_classes(10);
        let json = serde_json::to_string(&config).unwrap();

        assert!(json.contains(r#""head_pool":"global""#));
        assert_eq!(NetConfig::from_json(&json).unwrap(), config);
    }
}
