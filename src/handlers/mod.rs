pub mod health_handlers;
pub mod model_handlers;
