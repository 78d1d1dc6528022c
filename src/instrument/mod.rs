//! Access to external instrument services.
//!
//! Every instrument (robot arm, microscope, ...) runs its own HTTP service.
//! The scheduler talks to it in two ways:
//!
//! - `status` - poll `GET {base_url}/status` until the service reports `ready`
//! - `action` - `POST {base_url}` an action and wait for it to complete
//!
//! Both go through a [`Transport`], either the reqwest-backed
//! [`HttpTransport`] or the scripted [`MockTransport`] used in tests.

pub mod action;
pub mod mock;
pub mod status;
pub mod transport;

pub use action::{dispatch, Action};
pub use mock::{Call, MockTransport};
pub use status::StatusProber;
pub use transport::{HttpReply, HttpTransport, Transport};
