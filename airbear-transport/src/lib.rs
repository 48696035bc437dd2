mod rest;
mod server;
mod stream;

pub use rest::{RestBackend, Session};
pub use server::{API_BASE_URL, health_check};
pub use stream::LineBuffer;
