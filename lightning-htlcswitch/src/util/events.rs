// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Events are generated by the [`Switch`] whenever an HTLC reaches a terminal state which the
//! client may care about: a payment we sent resolved, a payment to us was claimed, or we earned a
//! fee forwarding one.
//!
//! Events are queued until the client fetches them with [`Switch::get_and_clear_pending_events`].
//!
//! [`Switch`]: crate::ln::switch::Switch
//! [`Switch::get_and_clear_pending_events`]: crate::ln::switch::Switch::get_and_clear_pending_events

use crate::ln::channel_id::ChannelId;
use crate::ln::types::{PaymentHash, PaymentPreimage};

/// An Event which you should probably take some action in response to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
	/// A payment we originated with [`Switch::send_htlc`] was settled by the recipient.
	///
	/// [`Switch::send_htlc`]: crate::ln::switch::Switch::send_htlc
	PaymentSent {
		/// The id returned by [`Switch::send_htlc`].
		///
		/// [`Switch::send_htlc`]: crate::ln::switch::Switch::send_htlc
		payment_id: u64,
		/// The hash of the payment.
		payment_hash: PaymentHash,
		/// The preimage released by the recipient, serving as proof of payment.
		payment_preimage: PaymentPreimage,
	},
	/// A payment we originated with [`Switch::send_htlc`] failed, either locally or somewhere
	/// along the route.
	///
	/// [`Switch::send_htlc`]: crate::ln::switch::Switch::send_htlc
	PaymentFailed {
		/// The id returned by [`Switch::send_htlc`].
		///
		/// [`Switch::send_htlc`]: crate::ln::switch::Switch::send_htlc
		payment_id: u64,
		/// The hash of the payment.
		payment_hash: PaymentHash,
		/// The failure code if the failure was generated by us. Failures relayed from remote
		/// nodes are opaque here.
		failure_code: Option<u16>,
	},
	/// An HTLC paying one of our invoices arrived and the invoice was settled.
	PaymentClaimed {
		/// The hash of the settled invoice.
		payment_hash: PaymentHash,
		/// The value of the HTLC, which may be above the invoice value.
		amount_msat: u64,
	},
	/// An HTLC we forwarded was settled, and we earned the difference between the incoming and
	/// outgoing amounts.
	PaymentForwarded {
		/// The channel the HTLC arrived on.
		prev_channel_id: ChannelId,
		/// The channel we forwarded the HTLC over.
		next_channel_id: ChannelId,
		/// The hash of the payment.
		payment_hash: PaymentHash,
		/// The amount we forwarded.
		outgoing_amount_msat: u64,
		/// The fee we kept.
		fee_earned_msat: u64,
	},
	/// We failed to forward an HTLC which arrived on `prev_channel_id` and failed it backwards.
	HTLCHandlingFailed {
		/// The channel the HTLC arrived on.
		prev_channel_id: ChannelId,
		/// The hash of the payment.
		payment_hash: PaymentHash,
		/// Why we failed it.
		failure_code: u16,
	},
}

/// A trait implemented for objects handling events drained from the [`Switch`].
///
/// [`Switch`]: crate::ln::switch::Switch
pub trait EventHandler {
	/// Handles the given [`Event`].
	fn handle_event(&self, event: Event);
}

impl<F> EventHandler for F
where
	F: Fn(Event),
{
	fn handle_event(&self, event: Event) {
		self(event)
	}
}
