mod block;
pub mod layers;
mod network;
mod stage;

pub use block::Block;
pub use network::{mobdensenet_v1, MobDenseNet};
pub use stage::{build_stages, Stage};
