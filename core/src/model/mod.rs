mod collection;
mod id_types;
mod playlist;
mod quality;
mod video;
pub use collection::*;
pub use id_types::*;
pub use playlist::*;
pub use quality::*;
pub use video::*;
