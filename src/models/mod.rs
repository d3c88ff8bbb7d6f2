pub mod artifact;
pub mod audio;
pub mod mapping;
pub mod meeting;
pub mod segment;

pub use artifact::*;
pub use audio::*;
pub use mapping::*;
pub use meeting::*;
pub use segment::*;
