pub mod body;
pub mod client;
pub mod forward;
pub mod handler;
pub mod options;
pub mod record;
pub mod replay;
pub mod server;
pub mod tls;
pub mod tunnel;

#[cfg(test)]
mod tests;

pub use server::Proxy;
