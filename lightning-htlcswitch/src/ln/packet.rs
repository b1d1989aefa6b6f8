// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The unit of work passed between the [`Switch`] and its links.
//!
//! An [`HtlcPacket`] is built once, by the link which received the HTLC update or by the switch
//! when it synthesizes a failure, and is never mutated afterwards. Resolving an add produces a new
//! packet via [`HtlcPacket::into_settle`] or [`HtlcPacket::into_fail`].
//!
//! [`Switch`]: crate::ln::switch::Switch

use crate::ln::channel_id::ChannelId;
use crate::ln::msgs::{HopPayload, OnionPacket};
use crate::ln::types::{PaymentHash, PaymentPreimage};

use crate::prelude::*;

use core::fmt;

/// Onion failure code flag: the failure is permanent, retrying the same route won't help.
pub const PERM: u16 = 0x4000;
/// Onion failure code flag: the sender should apply an enclosed channel update.
pub const UPDATE: u16 = 0x1000;

/// The reasons the switch or a link will fail an HTLC back, as BOLT 4 failure codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureCode {
	/// The outgoing channel is temporarily unable to carry the HTLC, e.g. it lacks bandwidth,
	/// is at its HTLC limit, or the amount exceeds its maximum.
	TemporaryChannelFailure,
	/// The outgoing channel went away while the HTLC was in flight.
	PermanentChannelFailure,
	/// No channel is known for the requested short channel id.
	UnknownNextPeer,
	/// The outgoing amount is below the channel's minimum HTLC.
	AmountBelowMinimum,
	/// The incoming amount doesn't pay the channel's fee.
	FeeInsufficient,
	/// The incoming expiry doesn't leave the channel's time-lock delta.
	IncorrectCltvExpiry,
	/// We are the recipient but the payment hash or amount doesn't match an open invoice.
	IncorrectOrUnknownPaymentDetails,
	/// The outgoing channel has not finished its handshake or is shutting down.
	ChannelDisabled,
	/// The onion carried no payload for us.
	InvalidOnionPayload,
}

impl FailureCode {
	/// The numeric BOLT 4 code, flags included.
	pub fn code(&self) -> u16 {
		match self {
			FailureCode::TemporaryChannelFailure => UPDATE | 7,
			FailureCode::PermanentChannelFailure => PERM | 8,
			FailureCode::UnknownNextPeer => PERM | 10,
			FailureCode::AmountBelowMinimum => UPDATE | 11,
			FailureCode::FeeInsufficient => UPDATE | 12,
			FailureCode::IncorrectCltvExpiry => UPDATE | 13,
			FailureCode::IncorrectOrUnknownPaymentDetails => PERM | 15,
			FailureCode::ChannelDisabled => UPDATE | 20,
			FailureCode::InvalidOnionPayload => PERM | 22,
		}
	}

	/// The BOLT 4 name, for logging.
	pub fn name(&self) -> &'static str {
		match self {
			FailureCode::TemporaryChannelFailure => "temporary_channel_failure",
			FailureCode::PermanentChannelFailure => "permanent_channel_failure",
			FailureCode::UnknownNextPeer => "unknown_next_peer",
			FailureCode::AmountBelowMinimum => "amount_below_minimum",
			FailureCode::FeeInsufficient => "fee_insufficient",
			FailureCode::IncorrectCltvExpiry => "incorrect_cltv_expiry",
			FailureCode::IncorrectOrUnknownPaymentDetails => "incorrect_or_unknown_payment_details",
			FailureCode::ChannelDisabled => "channel_disabled",
			FailureCode::InvalidOnionPayload => "invalid_onion_payload",
		}
	}
}

impl fmt::Display for FailureCode {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} ({:#06x})", self.name(), self.code())
	}
}

/// Why an HTLC is being failed backwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HTLCFailReason {
	/// We generated the failure.
	Reason {
		/// The BOLT 4 code, see [`FailureCode::code`].
		failure_code: u16,
		/// Code-specific failure data.
		data: Vec<u8>,
	},
	/// The failure came from downstream in an `update_fail_htlc` and is relayed as-is.
	Remote {
		/// The opaque reason bytes.
		data: Vec<u8>,
	},
}

impl HTLCFailReason {
	/// A locally generated failure with no extra data.
	pub fn from_failure_code(failure_code: FailureCode) -> Self {
		HTLCFailReason::Reason { failure_code: failure_code.code(), data: Vec::new() }
	}

	/// Wraps the reason bytes of an `update_fail_htlc` received from a peer.
	pub fn from_wire_reason(data: Vec<u8>) -> Self {
		HTLCFailReason::Remote { data }
	}

	/// The failure code, if we generated the failure ourselves.
	pub fn failure_code(&self) -> Option<u16> {
		match self {
			HTLCFailReason::Reason { failure_code, .. } => Some(*failure_code),
			HTLCFailReason::Remote { .. } => None,
		}
	}

	/// The bytes to put in the `reason` field of an `update_fail_htlc`.
	pub fn to_wire_reason(&self) -> Vec<u8> {
		match self {
			HTLCFailReason::Reason { failure_code, data } => {
				let mut res = Vec::with_capacity(2 + data.len());
				res.extend_from_slice(&failure_code.to_be_bytes());
				res.extend_from_slice(data);
				res
			},
			HTLCFailReason::Remote { data } => data.clone(),
		}
	}
}

/// Tracks the inbound corresponding to an outbound HTLC. This is the key of the switch's circuit
/// map, so it names the incoming channel by [`ChannelId`], which survives short channel id
/// changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HTLCSource {
	/// The HTLC was offered to us by the counterparty of `channel_id`.
	PreviousHop {
		/// The channel the HTLC arrived on.
		channel_id: ChannelId,
		/// The counterparty's id for the HTLC on that channel.
		htlc_id: u64,
	},
	/// The HTLC is a payment we originated.
	LocalPayment {
		/// The id [`Switch::send_htlc`] returned for it.
		///
		/// [`Switch::send_htlc`]: crate::ln::switch::Switch::send_htlc
		payment_id: u64,
	},
}

impl fmt::Display for HTLCSource {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			HTLCSource::PreviousHop { channel_id, htlc_id } => {
				write!(f, "channel {} htlc {}", channel_id, htlc_id)
			},
			HTLCSource::LocalPayment { payment_id } => write!(f, "local payment {}", payment_id),
		}
	}
}

/// What an [`HtlcPacket`] asks its recipient to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HtlcUpdate {
	/// Offer a new HTLC over the outgoing link.
	Add {
		/// The expiry of the HTLC we received, or equal to `outgoing_cltv_expiry` for local
		/// payments.
		incoming_cltv_expiry: u32,
		/// The expiry the outgoing HTLC must carry.
		outgoing_cltv_expiry: u32,
		/// The onion to hand to the next hop.
		onion: OnionPacket,
	},
	/// Settle the HTLC identified by the packet's source.
	Settle {
		/// The preimage unlocking it.
		payment_preimage: PaymentPreimage,
	},
	/// Fail the HTLC identified by the packet's source.
	Fail {
		/// Why.
		reason: HTLCFailReason,
	},
}

/// An HTLC update travelling between links through the switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HtlcPacket {
	source: HTLCSource,
	payment_hash: PaymentHash,
	incoming_amount_msat: u64,
	amount_msat: u64,
	outgoing_short_channel_id: u64,
	update: HtlcUpdate,
}

impl HtlcPacket {
	/// An add which arrived with `incoming_amount_msat` and `incoming_cltv_expiry`, to be
	/// forwarded as `next_hop` describes carrying `onion`.
	pub fn add(
		source: HTLCSource, payment_hash: PaymentHash, incoming_amount_msat: u64,
		incoming_cltv_expiry: u32, next_hop: &HopPayload, onion: OnionPacket,
	) -> Self {
		HtlcPacket {
			source,
			payment_hash,
			incoming_amount_msat,
			amount_msat: next_hop.amt_to_forward,
			outgoing_short_channel_id: next_hop.short_channel_id,
			update: HtlcUpdate::Add {
				incoming_cltv_expiry,
				outgoing_cltv_expiry: next_hop.outgoing_cltv_value,
				onion,
			},
		}
	}

	/// A settle for the add identified by `source`.
	pub fn settle(
		source: HTLCSource, payment_hash: PaymentHash, amount_msat: u64,
		payment_preimage: PaymentPreimage,
	) -> Self {
		HtlcPacket {
			source,
			payment_hash,
			incoming_amount_msat: amount_msat,
			amount_msat,
			outgoing_short_channel_id: 0,
			update: HtlcUpdate::Settle { payment_preimage },
		}
	}

	/// A fail for the add identified by `source`.
	pub fn fail(
		source: HTLCSource, payment_hash: PaymentHash, amount_msat: u64, reason: HTLCFailReason,
	) -> Self {
		HtlcPacket {
			source,
			payment_hash,
			incoming_amount_msat: amount_msat,
			amount_msat,
			outgoing_short_channel_id: 0,
			update: HtlcUpdate::Fail { reason },
		}
	}

	/// Resolves this add with a failure, keeping its source and amounts.
	pub fn into_fail(self, reason: HTLCFailReason) -> Self {
		HtlcPacket { update: HtlcUpdate::Fail { reason }, ..self }
	}

	/// Resolves this add with a settle, keeping its source and amounts.
	pub fn into_settle(self, payment_preimage: PaymentPreimage) -> Self {
		HtlcPacket { update: HtlcUpdate::Settle { payment_preimage }, ..self }
	}

	/// This resolution, stamped with the amount of the incoming HTLC it resolves. Resolutions built
	/// by the outgoing link only know the outgoing amount.
	pub fn with_incoming_amount_msat(self, incoming_amount_msat: u64) -> Self {
		HtlcPacket { incoming_amount_msat, ..self }
	}

	/// Where the add this packet belongs to came from.
	pub fn source(&self) -> &HTLCSource {
		&self.source
	}

	/// The payment hash.
	pub fn payment_hash(&self) -> &PaymentHash {
		&self.payment_hash
	}

	/// The amount of the HTLC we received.
	pub fn incoming_amount_msat(&self) -> u64 {
		self.incoming_amount_msat
	}

	/// The amount of the HTLC we send (or sent) out.
	pub fn amount_msat(&self) -> u64 {
		self.amount_msat
	}

	/// The channel to forward over, `0` if we are the final hop or for resolutions.
	pub fn outgoing_short_channel_id(&self) -> u64 {
		self.outgoing_short_channel_id
	}

	/// What to do with the HTLC.
	pub fn update(&self) -> &HtlcUpdate {
		&self.update
	}

	/// Whether this is an [`HtlcUpdate::Add`].
	pub fn is_add(&self) -> bool {
		matches!(self.update, HtlcUpdate::Add { .. })
	}

	/// The fee we keep if this add is forwarded as-is.
	pub fn fee_msat(&self) -> u64 {
		self.incoming_amount_msat.saturating_sub(self.amount_msat)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_add() -> HtlcPacket {
		let hop = HopPayload { short_channel_id: 42, amt_to_forward: 9_000, outgoing_cltv_value: 500 };
		HtlcPacket::add(
			HTLCSource::PreviousHop { channel_id: ChannelId::from_bytes([3; 32]), htlc_id: 7 },
			PaymentHash([4; 32]),
			10_000,
			600,
			&hop,
			OnionPacket::default(),
		)
	}

	#[test]
	fn add_takes_terms_from_hop() {
		let add = test_add();
		assert!(add.is_add());
		assert_eq!(add.amount_msat(), 9_000);
		assert_eq!(add.fee_msat(), 1_000);
		assert_eq!(add.outgoing_short_channel_id(), 42);
		match add.update() {
			HtlcUpdate::Add { incoming_cltv_expiry, outgoing_cltv_expiry, .. } => {
				assert_eq!(*incoming_cltv_expiry, 600);
				assert_eq!(*outgoing_cltv_expiry, 500);
			},
			_ => panic!(),
		}
	}

	#[test]
	fn resolving_keeps_source() {
		let add = test_add();
		let source = *add.source();
		let fail = add.clone().into_fail(HTLCFailReason::from_failure_code(FailureCode::UnknownNextPeer));
		assert_eq!(*fail.source(), source);
		assert_eq!(fail.payment_hash(), add.payment_hash());
		assert!(!fail.is_add());
		let settle = add.into_settle(PaymentPreimage([5; 32]));
		assert_eq!(*settle.source(), source);
		let stamped = settle.clone().with_incoming_amount_msat(settle.amount_msat() + 1_000);
		assert_eq!(stamped.incoming_amount_msat(), settle.amount_msat() + 1_000);
		assert_eq!(stamped.update(), settle.update());
	}

	#[test]
	fn failure_codes() {
		assert_eq!(FailureCode::UnknownNextPeer.code(), 0x400a);
		assert_eq!(FailureCode::TemporaryChannelFailure.code(), 0x1007);
		assert_eq!(FailureCode::IncorrectOrUnknownPaymentDetails.code(), 0x400f);
		assert_eq!(FailureCode::ChannelDisabled.code(), 0x1014);
		assert_eq!(FailureCode::FeeInsufficient.to_string(), "fee_insufficient (0x100c)");
	}

	#[test]
	fn wire_reason() {
		let local = HTLCFailReason::Reason { failure_code: 0x400f, data: vec![1, 2] };
		assert_eq!(local.to_wire_reason(), vec![0x40, 0x0f, 1, 2]);
		let remote = HTLCFailReason::from_wire_reason(local.to_wire_reason());
		assert_eq!(remote.failure_code(), None);
		assert_eq!(remote.to_wire_reason(), vec![0x40, 0x0f, 1, 2]);
	}
}
