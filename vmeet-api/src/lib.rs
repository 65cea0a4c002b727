// VMeet API Library
//
// HTTP join/token endpoints and the WebSocket signaling surface

pub mod http;
pub mod ws;

// Re-export commonly used types
pub use http::{create_router, AppError, AppResult, AppState};
