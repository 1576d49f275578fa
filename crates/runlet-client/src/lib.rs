//! # runlet-client
//!
//! The browser-side half of runlet, as a library: a [`channel::Channel`]
//! wrapping one persistent WebSocket connection, and a [`driver::Driver`]
//! that owns the channel, funnels every inbound frame and outbound
//! submission through the run session state machine, and hands rendered
//! screen events to the caller.
//!
//! The channel has an explicit lifecycle and never reconnects on its own; a
//! caller wanting retry observes [`driver::ScreenEvent::ConnectionLost`] and
//! constructs a new driver.

#![deny(unsafe_code)]

pub mod channel;
pub mod driver;

pub use channel::{Channel, ChannelState};
pub use driver::{Driver, ScreenEvent};
