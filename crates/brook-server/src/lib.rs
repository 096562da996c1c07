pub mod api;
pub mod state;

pub use api::relay_router;
pub use state::RelayState;
