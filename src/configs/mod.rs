mod model;

pub use model::{
    HeadPoolSpec, NetConfig, StageSpec, DEFAULT_NUM_CLASSES, HEAD_CHANNELS, HEAD_IN,
    HEAD_POOL_WINDOW, INPUT_CHANNELS, MAX_STAGE_BLOCKS, STEM_CHANNELS, V1_STAGES,
};
