//! # charla-client
//!
//! Session layer of the charla chat client: the command façade (one async
//! method per protocol verb), the event bus local components subscribe to,
//! and the ingestion pipeline that turns inbound push events into
//! deduplicated local history.
//!
//! The graphical presentation layer is a consumer of this crate, not part
//! of it: it calls façade methods, subscribes to the bus, and renders.

pub mod commands;
pub mod events;
pub mod ingest;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use commands::AudioUpload;
pub use events::{EventBus, Notification, SubscriberId};
pub use session::Session;

/// Initialise structured logging for a host application.
///
/// `RUST_LOG` takes precedence; the fallback keeps the charla crates at
/// debug and everything else at warn.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("charla_client=debug,charla_net=debug,charla_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
