// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The capabilities the [`Switch`] and its links are built against.
//!
//! The commitment state machine, the transport and invoice storage are not part of this crate.
//! They are reached through [`Peer`] and [`InvoiceDatabase`], and the switch only ever talks to
//! links through [`ChannelLink`], so any of these may be swapped for an in-memory version.
//!
//! [`Switch`]: crate::ln::switch::Switch

use bitcoin::secp256k1::PublicKey;
use bitcoin::OutPoint;

use crate::ln::channel_id::ChannelId;
use crate::ln::msgs::Message;
use crate::ln::packet::{FailureCode, HtlcPacket};
use crate::ln::types::{PaymentHash, PaymentPreimage};
use crate::util::config::ForwardingPolicy;
use crate::util::errors::{APIError, InvoiceError, PeerError};

use crate::sync::Arc;

/// An invoice as stored by an [`InvoiceDatabase`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Invoice {
	/// The preimage we reveal to claim a payment to this invoice.
	pub payment_preimage: PaymentPreimage,
	/// The amount we asked for. HTLCs paying less are refused.
	pub value_msat: u64,
	/// Whether a payment to this invoice was already accepted.
	pub settled: bool,
}

/// Access to the invoices we issued, used by the switch when we are the final hop of an HTLC.
pub trait InvoiceDatabase: Send + Sync {
	/// Fetches the invoice for `payment_hash`, failing with [`InvoiceError::NotFound`] if we never
	/// issued one.
	fn lookup_invoice(&self, payment_hash: &PaymentHash) -> Result<Invoice, InvoiceError>;

	/// Marks the invoice for `payment_hash` as paid. Must succeed at most once per invoice, later
	/// calls fail with [`InvoiceError::AlreadySettled`] and leave the invoice untouched.
	fn settle_invoice(&self, payment_hash: &PaymentHash) -> Result<(), InvoiceError>;
}

/// A connection to the counterparty of one or more links.
pub trait Peer: Send + Sync {
	/// Queues a message for the peer. Messages are delivered in the order they were sent. Fails
	/// with [`PeerError::Disconnected`] once [`Peer::disconnect`] was called.
	fn send_message(&self, msg: Message) -> Result<(), PeerError>;

	/// Forgets all state for the channel funded by `funding_outpoint`. Unknown outpoints are not
	/// an error.
	fn wipe_channel(&self, funding_outpoint: &OutPoint) -> Result<(), PeerError>;

	/// The peer's node id.
	fn pub_key(&self) -> PublicKey;

	/// Tears the connection down.
	fn disconnect(&self, reason: &str);
}

/// Lifecycle of a [`ChannelLink`]. A link only ever moves forward through these, and
/// [`LinkState::Stopped`] is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkState {
	/// Constructed, [`ChannelLink::start`] not called yet.
	Created,
	/// [`ChannelLink::start`] is running.
	Starting,
	/// Processing updates.
	Active,
	/// [`ChannelLink::stop`] is draining the link.
	Stopping,
	/// Done. Also reached if starting failed.
	Stopped,
}

impl LinkState {
	pub(crate) fn from_u8(state: u8) -> LinkState {
		match state {
			0 => LinkState::Created,
			1 => LinkState::Starting,
			2 => LinkState::Active,
			3 => LinkState::Stopping,
			_ => LinkState::Stopped,
		}
	}

	pub(crate) fn as_u8(&self) -> u8 {
		*self as u8
	}
}

/// Running totals of a link's traffic. Every counter only ever grows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
	/// HTLC updates (adds, settles and fails) processed in either direction.
	pub num_updates: u64,
	/// Value of the HTLCs we offered which were settled.
	pub total_sent_msat: u64,
	/// Value of the HTLCs offered to us which we settled.
	pub total_received_msat: u64,
}

/// The switch's view of a channel.
///
/// [`Self::handle_switch_packet`] and [`Self::handle_channel_update`] must never block on the
/// link's processing: implementations queue the update and return.
pub trait ChannelLink: Send + Sync {
	/// Queues an add to offer over this channel, or a settle or fail for an HTLC the counterparty
	/// offered us.
	fn handle_switch_packet(&self, packet: HtlcPacket);

	/// Queues a message the counterparty sent for this channel.
	fn handle_channel_update(&self, msg: Message);

	/// Queues tracking of an HTLC of `amount_msat` the counterparty offered us with `htlc_id`
	/// before this link was registered, e.g. on the link a channel had before it was re-added.
	/// Settles and fails the switch hands over for such an HTLC are then sent to the counterparty
	/// like any other. Already tracked ids are left alone.
	fn restore_incoming_htlc(&self, htlc_id: u64, amount_msat: u64);

	/// The channel's permanent id.
	fn channel_id(&self) -> ChannelId;

	/// The channel's current short id, `0` if it has none yet.
	fn short_channel_id(&self) -> u64;

	/// Replaces the short id. Callers must also update the switch's index, use
	/// [`Switch::update_short_chan_id`] rather than calling this directly.
	///
	/// [`Switch::update_short_chan_id`]: crate::ln::switch::Switch::update_short_chan_id
	fn update_short_chan_id(&self, short_channel_id: u64);

	/// Swaps the forwarding policy. HTLCs already admitted keep the terms they were admitted
	/// under.
	fn update_forwarding_policy(&self, policy: ForwardingPolicy);

	/// The current forwarding policy.
	fn forwarding_policy(&self) -> ForwardingPolicy;

	/// Checks whether forwarding an HTLC over this link satisfies its current policy.
	fn check_htlc_forward(
		&self, incoming_amount_msat: u64, outgoing_amount_msat: u64, incoming_cltv_expiry: u32,
		outgoing_cltv_expiry: u32,
	) -> Result<(), FailureCode> {
		self.forwarding_policy().check_htlc_forward(
			incoming_amount_msat,
			outgoing_amount_msat,
			incoming_cltv_expiry,
			outgoing_cltv_expiry,
		)
	}

	/// How much we can currently send over the link: capacity minus outgoing HTLCs in flight
	/// minus our reserve, never negative.
	fn bandwidth(&self) -> u64;

	/// Traffic totals.
	fn stats(&self) -> LinkStats;

	/// The counterparty.
	fn peer(&self) -> Arc<dyn Peer>;

	/// Whether the link is active and completed its handshake, i.e. may carry new HTLCs.
	fn eligible_to_forward(&self) -> bool;

	/// The lifecycle state.
	fn state(&self) -> LinkState;

	/// Starts processing. Fails with [`APIError::ChannelUnavailable`] if the channel cannot be
	/// used, leaving the link [`LinkState::Stopped`].
	fn start(&self) -> Result<(), APIError>;

	/// Stops processing, resolving every HTLC still pending on the link. Calling this again is a
	/// no-op.
	fn stop(&self);
}

/// The half of the [`Switch`] a link sees.
///
/// [`Switch`]: crate::ln::switch::Switch
pub trait PacketSwitch: Send + Sync {
	/// Hands a packet received on a link to the switch: an add to route onwards, or a settle or
	/// fail resolving an add the switch handed to the link earlier.
	fn forward(&self, packet: HtlcPacket);

	/// Keeps a settle or fail for `channel_id` which the link could no longer deliver, until a link
	/// for the channel is registered again.
	fn park_resolution(&self, channel_id: ChannelId, packet: HtlcPacket);

	/// Reports that the connection to `their_node_id` failed, so every link to that peer must be
	/// stopped and what is pending on them failed back.
	fn peer_disconnected(&self, their_node_id: &PublicKey);
}
