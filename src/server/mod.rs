//! HTTP boundary: router, handlers, and error mapping.
//!
//! Requests flow AuthZ → RateLimit → Handler; errors translate to status
//! codes only here. The request pipeline stages live in `handlers::gate`.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;

pub use error::ApiError;
pub use router::build_router;
