pub mod interfaces;
pub mod runtime;
pub mod toggle;

pub use interfaces::{SERVER_CONTROL, SERVER_EVENT, SUBJECT, USER_EVENT};
pub use runtime::{managed_labels, provision, wait_until_inspectable};
pub use toggle::{changes, toggled};
