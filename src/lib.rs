mod demux;
mod error;
mod midi_file;
mod model;
mod pianoroll;
mod serializer;
mod stream;
mod tempo;
mod util;

pub use demux::*;
pub use error::*;
pub use midi_file::*;
pub use model::config::*;
pub use model::containers::*;
pub use model::key::*;
pub use model::score::*;
pub use pianoroll::*;
pub use serializer::*;
pub use stream::*;
pub use tempo::*;
pub use util::*;
