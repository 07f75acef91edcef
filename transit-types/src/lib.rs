//! Data model shared by the tracking server and its clients.
//!
//! [models] holds the catalog and real-time records exactly as they travel
//! over the REST surface; [events] holds the frames carried by the push
//! channel.

pub mod events;
pub mod models;


pub use events::{ClientEvent, ServerEvent};
pub use models::*;
