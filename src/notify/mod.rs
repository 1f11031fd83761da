//! Concrete delivery targets for the scanner's observer and sink seams.

mod logging;
mod webhook;

pub use logging::LoggingObserver;
pub use webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER, WebhookNotifySink, WebhookPayload};
