// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! ChannelId definition.

use bitcoin::hashes::Hash;
use bitcoin::OutPoint;

use core::fmt;

/// A unique 32-byte identifier for a channel, derived from its funding outpoint.
///
/// Unlike the short channel id, this never changes for the lifetime of the channel, so the switch
/// uses it to refer back to the link an HTLC arrived on.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
	/// Create a channel ID from a funding TX ID and output index: the txid with the output index
	/// XORed into its last two bytes.
	pub fn v1_from_funding_txid(txid: &[u8; 32], output_index: u16) -> Self {
		let mut res = [0; 32];
		res[..].copy_from_slice(&txid[..]);
		res[30] ^= ((output_index >> 8) & 0xff) as u8;
		res[31] ^= ((output_index >> 0) & 0xff) as u8;
		Self(res)
	}

	/// Create a channel ID from the funding outpoint.
	pub fn v1_from_funding_outpoint(outpoint: OutPoint) -> Self {
		Self::v1_from_funding_txid(outpoint.txid.as_byte_array(), outpoint.vout as u16)
	}

	/// Generic constructor; create a new channel ID from the provided data.
	pub fn from_bytes(data: [u8; 32]) -> Self {
		Self(data)
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		crate::util::logger::DebugBytes(&self.0).fmt(f)
	}
}

#[cfg(test)]
mod tests {
	use super::ChannelId;
	use bitcoin::hashes::Hash;
	use bitcoin::{OutPoint, Txid};

	#[test]
	fn test_channel_id_v1_from_funding_txid() {
		let channel_id = ChannelId::v1_from_funding_txid(&[2; 32], 1);
		assert_eq!(channel_id.to_string(), "0202020202020202020202020202020202020202020202020202020202020203");
	}

	#[test]
	fn test_channel_id_from_outpoint_matches_txid() {
		let outpoint = OutPoint { txid: Txid::from_byte_array([5; 32]), vout: 0x0102 };
		assert_eq!(
			ChannelId::v1_from_funding_outpoint(outpoint),
			ChannelId::v1_from_funding_txid(&[5; 32], 0x0102)
		);
		let id = ChannelId::v1_from_funding_outpoint(outpoint);
		assert_eq!(id.0[30], 5 ^ 0x01);
		assert_eq!(id.0[31], 5 ^ 0x02);
	}

	#[test]
	fn test_channel_id_equals() {
		let channel_id11 = ChannelId::v1_from_funding_txid(&[2; 32], 2);
		let channel_id12 = ChannelId::v1_from_funding_txid(&[2; 32], 2);
		let channel_id21 = ChannelId::v1_from_funding_txid(&[2; 32], 42);
		assert_eq!(channel_id11, channel_id12);
		assert_ne!(channel_id11, channel_id21);
	}
}
