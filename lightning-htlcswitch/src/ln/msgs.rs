// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The HTLC update messages exchanged with a channel counterparty.
//!
//! These are the already-decoded forms of the BOLT 2 messages. Serialization, transport
//! encryption and onion decryption happen elsewhere; a link only ever sees these structs.

use crate::ln::channel_id::ChannelId;
use crate::ln::types::{PaymentHash, PaymentPreimage};

use crate::prelude::*;

/// The per-hop payload a node finds after peeling its layer of the onion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HopPayload {
	/// The channel to forward over, or `0` if this node is the final recipient.
	pub short_channel_id: u64,
	/// The amount to forward (or, for the final hop, the amount the payee expects).
	pub amt_to_forward: u64,
	/// The CLTV expiry of the outgoing HTLC (or, for the final hop, the expected expiry).
	pub outgoing_cltv_value: u32,
}

/// The decoded onion carried by an `update_add_htlc`: one [`HopPayload`] per remaining hop, ours
/// first.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct OnionPacket {
	/// Remaining hops, in path order.
	pub hops: Vec<HopPayload>,
}

impl OnionPacket {
	/// Builds an onion from a list of per-hop payloads.
	pub fn new(hops: Vec<HopPayload>) -> Self {
		OnionPacket { hops }
	}

	/// Splits off our payload, returning it with the onion to hand to the next hop. `None` means
	/// the onion was empty and the HTLC must be failed.
	pub fn peel(mut self) -> Option<(HopPayload, OnionPacket)> {
		if self.hops.is_empty() {
			return None;
		}
		let ours = self.hops.remove(0);
		Some((ours, self))
	}
}

/// An update_add_htlc message to be sent or received from a peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateAddHTLC {
	/// The channel ID
	pub channel_id: ChannelId,
	/// The HTLC ID
	pub htlc_id: u64,
	/// The HTLC value in milli-satoshi
	pub amount_msat: u64,
	/// The payment hash, the pre-image of which controls HTLC redemption
	pub payment_hash: PaymentHash,
	/// The expiry height of the HTLC
	pub cltv_expiry: u32,
	/// The onion routing packet with encrypted data for the next hop.
	pub onion_routing_packet: OnionPacket,
}

/// An update_fulfill_htlc message to be sent or received from a peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateFulfillHTLC {
	/// The channel ID
	pub channel_id: ChannelId,
	/// The HTLC ID
	pub htlc_id: u64,
	/// The pre-image of the payment hash, allowing HTLC redemption
	pub payment_preimage: PaymentPreimage,
}

/// An update_fail_htlc message to be sent or received from a peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateFailHTLC {
	/// The channel ID
	pub channel_id: ChannelId,
	/// The HTLC ID
	pub htlc_id: u64,
	/// The failure reason, opaque to every node but the payment's origin.
	pub reason: Vec<u8>,
}

/// A channel_ready message, signalling the counterparty finished the pre-forwarding handshake
/// and we may start offering HTLCs over the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelReady {
	/// The channel ID
	pub channel_id: ChannelId,
}

/// A channel-level message exchanged with the counterparty of a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
	/// See [`ChannelReady`].
	ChannelReady(ChannelReady),
	/// See [`UpdateAddHTLC`].
	UpdateAddHTLC(UpdateAddHTLC),
	/// See [`UpdateFulfillHTLC`].
	UpdateFulfillHTLC(UpdateFulfillHTLC),
	/// See [`UpdateFailHTLC`].
	UpdateFailHTLC(UpdateFailHTLC),
}

impl Message {
	/// The channel this message belongs to.
	pub fn channel_id(&self) -> ChannelId {
		match self {
			Message::ChannelReady(msg) => msg.channel_id,
			Message::UpdateAddHTLC(msg) => msg.channel_id,
			Message::UpdateFulfillHTLC(msg) => msg.channel_id,
			Message::UpdateFailHTLC(msg) => msg.channel_id,
		}
	}

	/// The BOLT 1 message type number.
	pub fn type_id(&self) -> u16 {
		match self {
			Message::ChannelReady(_) => 36,
			Message::UpdateAddHTLC(_) => 128,
			Message::UpdateFulfillHTLC(_) => 130,
			Message::UpdateFailHTLC(_) => 131,
		}
	}
}
