pub mod enums;
pub mod facility;
pub mod patient;
pub mod statistics;
pub mod visit;

pub use enums::*;
pub use facility::*;
pub use patient::*;
pub use statistics::*;
pub use visit::*;
