pub mod memory;
pub mod rows;
pub mod schema;
pub mod scylla;
pub mod traits;

pub use memory::*;
pub use rows::*;
// `self::` keeps the submodule from colliding with the driver crate.
pub use self::scylla::*;
pub use traits::*;
