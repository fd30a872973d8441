mod app;
mod notification;

pub use app::{add_routes, AppState};
pub use notification::ObjectCreatedResponse;
