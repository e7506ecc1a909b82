pub mod edge;
pub mod messages;
pub mod topics;

pub use edge::*;
pub use messages::*;
pub use topics::*;
