pub mod rest;
pub mod stream;

pub use rest::BinanceGateway;
pub use stream::BinanceStream;
