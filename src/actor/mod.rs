pub mod helper;
pub mod message;
pub mod router;

pub use helper::*;
pub use message::*;
pub use router::*;
