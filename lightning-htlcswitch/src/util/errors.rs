// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Error types live here.
//!
//! Only structural errors (a link which could not start, a misused switch API) are returned to
//! callers. Anything which goes wrong with an individual HTLC is turned into a fail packet and
//! routed backwards instead, see [`HTLCFailReason`].
//!
//! [`HTLCFailReason`]: crate::ln::packet::HTLCFailReason

use crate::prelude::*;

use core::fmt;

/// Indicates an error on the client's part (usually some variant of attempting to register the
/// same link twice or to use a link which is not running).
#[derive(Clone, PartialEq, Eq)]
pub enum APIError {
	/// Indicates the API was wholly misused (see err for more). Cases where these can be returned
	/// are documented, but generally indicates some precondition of a function was violated.
	APIMisuseError {
		/// A human-readable error message
		err: String,
	},
	/// We were unable to complete the request as the channel link required to do so is unable to
	/// complete the request (or was not found). This includes a link which failed to initialize
	/// and is now stopped.
	ChannelUnavailable {
		/// A human-readable error message
		err: String,
	},
}

impl fmt::Debug for APIError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			APIError::APIMisuseError { ref err } => write!(f, "Misuse error: {}", err),
			APIError::ChannelUnavailable { ref err } => write!(f, "Channel unavailable: {}", err),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

impl std::error::Error for APIError {}

/// Returned by a [`Peer`] when a message cannot be handed to the transport.
///
/// [`Peer`]: crate::ln::interfaces::Peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerError {
	/// [`Peer::disconnect`] was called, no further messages will be delivered.
	///
	/// [`Peer::disconnect`]: crate::ln::interfaces::Peer::disconnect
	Disconnected,
}

impl fmt::Display for PeerError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			PeerError::Disconnected => f.write_str("peer is disconnected"),
		}
	}
}

impl std::error::Error for PeerError {}

/// Returned by an [`InvoiceDatabase`].
///
/// The switch relies on the distinction between these to decide whether an HTLC paying us is
/// settled or failed backwards.
///
/// [`InvoiceDatabase`]: crate::ln::interfaces::InvoiceDatabase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvoiceError {
	/// No invoice is known for the payment hash.
	NotFound,
	/// The invoice was already settled, settling it again is refused.
	AlreadySettled,
}

impl fmt::Display for InvoiceError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			InvoiceError::NotFound => f.write_str("invoice not found"),
			InvoiceError::AlreadySettled => f.write_str("invoice already settled"),
		}
	}
}

impl std::error::Error for InvoiceError {}
