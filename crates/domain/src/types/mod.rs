//! Domain data types

pub mod appointment;
pub mod event;
pub mod mapping;
pub mod summary;
pub mod technician;

pub use appointment::*;
pub use event::*;
pub use mapping::*;
pub use summary::*;
pub use technician::*;
