pub mod admin;
pub mod builder;
pub mod handler;

pub use admin::AdminServer;
pub use builder::ServerBuilder;
pub use handler::RequestHandler;
