pub mod connection;
pub mod tls;

pub use connection::{amqp_uri, connect, BrokerConnection};
pub use tls::{load_tls_material, TlsMaterial};
