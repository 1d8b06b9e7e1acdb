pub mod intent;
pub mod message;
pub mod slots;
pub mod turn;

pub use intent::*;
pub use message::*;
pub use slots::*;
pub use turn::*;
