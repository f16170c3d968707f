pub mod arch;
pub mod configs;
pub mod error;
pub mod initialization;
mod test;

pub use arch::{mobdensenet_v1, MobDenseNet};
pub use configs::NetConfig;
pub use error::{NetErr, Result};
