//! HTTP API handlers for carvet-vv

pub mod health;
pub mod sse;
pub mod verification;

pub use health::health_routes;
pub use sse::event_stream;
pub use verification::verification_routes;
