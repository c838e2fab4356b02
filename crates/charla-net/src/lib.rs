// Connection layer: one TCP socket, one read loop, many listeners.

pub mod config;
pub mod correlator;
pub mod transport;

mod error;

pub use config::NetConfig;
pub use correlator::{Correlator, ResponseWaiter};
pub use error::{NetError, Result};
pub use transport::{ListenerId, Transport, TransportEvent};
