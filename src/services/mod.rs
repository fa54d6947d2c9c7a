pub mod cursor;
pub mod element;
pub mod room;
pub mod snapshot;
