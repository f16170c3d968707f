mod batch_norm;
mod conv;
mod layer;
mod pool;
mod relu;
mod sequential;
mod shape;

pub use batch_norm::BatchNorm2d;
pub use conv::Conv2d;
pub use layer::{Layer, LayerInfo, LayerKind};
pub use pool::{AvgPool2d, GlobalAvgPool};
pub use relu::Relu;
pub use sequential::Sequential;
pub use shape::FeatureShape;
