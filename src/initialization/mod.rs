mod constant;
mod fan_out;
mod param_gen;
mod random;
mod visitor;

pub use constant::ConstParamGen;
pub use fan_out::FanOutInit;
pub use param_gen::ParamGen;
pub use random::RandParamGen;
pub use visitor::LayerVisitor;
