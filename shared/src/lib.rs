pub mod action;
pub mod colors;
pub mod events;
pub mod faction;
pub mod region;

pub use action::*;
pub use colors::Rgb;
pub use events::*;
pub use faction::*;
pub use region::*;
