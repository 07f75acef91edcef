//! Client side of the live tracking system: the synchronization store, the
//! push channel connection, request cancellation and the catalog search
//! session.

pub mod api;
pub mod cancellation;
pub mod channel;
pub mod search;
pub mod state;
pub mod store;


pub use api::{ApiError, HttpApi, RouteQuery, TransitApi};
pub use cancellation::{CancellationManager, RequestClass, RequestToken};
pub use channel::{ChannelConfig, ChannelEvent, ChannelHandle, PushChannel, TransportError};
pub use search::{SearchEntry, SearchSession};
pub use state::{reduce, Action, ConnectionState, StoreState};
pub use store::SyncStore;
