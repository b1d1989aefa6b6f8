// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various user-configurable link limits and settings which the [`Switch`] and [`Link`] apply for
//! you.
//!
//! [`Switch`]: crate::ln::switch::Switch
//! [`Link`]: crate::ln::link::Link

use crate::ln::packet::FailureCode;

/// The minimum time-lock delta we will ever require between an incoming HTLC and the HTLC we
/// forward for it. Lower configured values are raised to this.
pub const MIN_CLTV_EXPIRY_DELTA: u16 = 6 * 3;

/// The BOLT 2 upper bound on the number of HTLCs either side may have pending in one direction.
pub const MAX_ACCEPTED_HTLCS: u16 = 483;

/// Fee and time-lock rules a link applies when deciding whether to relay an HTLC over it.
///
/// A link's policy may be swapped at runtime with [`ChannelLink::update_forwarding_policy`]. The
/// new policy only governs HTLCs evaluated after the swap, HTLCs already admitted keep the terms
/// computed at admission.
///
/// [`ChannelLink::update_forwarding_policy`]: crate::ln::interfaces::ChannelLink::update_forwarding_policy
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ForwardingPolicy {
	/// Flat fee, in millisatoshi, charged for every HTLC forwarded over the link.
	///
	/// Default value: 1000 msat.
	pub base_fee_msat: u64,
	/// Amount (in millionths of a satoshi) charged per transferred satoshi on top of
	/// [`Self::base_fee_msat`].
	///
	/// Default value: 1.
	pub fee_rate_millionths: u32,
	/// The smallest outgoing HTLC we are willing to forward over the link.
	///
	/// Default value: 1 msat.
	pub min_htlc_msat: u64,
	/// The largest outgoing HTLC we are willing to forward over the link.
	///
	/// Default value: `u64::MAX`, i.e. only bounded by bandwidth.
	pub max_htlc_msat: u64,
	/// The difference in the CLTV value between incoming HTLCs and an outbound HTLC forwarded over
	/// the link this policy applies to.
	///
	/// Default value: 72 (12 hours at an average of 6 blocks/hour).
	/// Minimum value: [`MIN_CLTV_EXPIRY_DELTA`], any values less than this will be treated as
	///                [`MIN_CLTV_EXPIRY_DELTA`] instead.
	pub time_lock_delta: u16,
}

impl Default for ForwardingPolicy {
	fn default() -> Self {
		ForwardingPolicy {
			base_fee_msat: 1000,
			fee_rate_millionths: 1,
			min_htlc_msat: 1,
			max_htlc_msat: u64::MAX,
			time_lock_delta: 6 * 12, // 6 blocks/hour * 12 hours
		}
	}
}

impl ForwardingPolicy {
	/// The fee we require for forwarding `amt_to_forward_msat` over the link.
	///
	/// Saturates rather than overflowing so absurd amounts are simply rejected as underpaying.
	pub fn fee_for(&self, amt_to_forward_msat: u64) -> u64 {
		let proportional =
			(amt_to_forward_msat as u128 * self.fee_rate_millionths as u128) / 1_000_000;
		self.base_fee_msat.saturating_add(u64::try_from(proportional).unwrap_or(u64::MAX))
	}

	/// The time-lock delta actually enforced, after applying the [`MIN_CLTV_EXPIRY_DELTA`] floor.
	pub fn effective_time_lock_delta(&self) -> u16 {
		core::cmp::max(self.time_lock_delta, MIN_CLTV_EXPIRY_DELTA)
	}

	/// Checks an outgoing amount against [`Self::min_htlc_msat`] and [`Self::max_htlc_msat`].
	pub fn check_htlc_amount(&self, amount_msat: u64) -> Result<(), FailureCode> {
		if amount_msat < self.min_htlc_msat {
			return Err(FailureCode::AmountBelowMinimum);
		}
		if amount_msat > self.max_htlc_msat {
			return Err(FailureCode::TemporaryChannelFailure);
		}
		Ok(())
	}

	/// Checks that relaying an HTLC we received for `incoming_amount_msat` with expiry
	/// `incoming_cltv_expiry` as an HTLC of `outgoing_amount_msat` expiring at
	/// `outgoing_cltv_expiry` satisfies this policy.
	pub fn check_htlc_forward(
		&self, incoming_amount_msat: u64, outgoing_amount_msat: u64, incoming_cltv_expiry: u32,
		outgoing_cltv_expiry: u32,
	) -> Result<(), FailureCode> {
		self.check_htlc_amount(outgoing_amount_msat)?;
		let required = outgoing_amount_msat.saturating_add(self.fee_for(outgoing_amount_msat));
		if incoming_amount_msat < required {
			return Err(FailureCode::FeeInsufficient);
		}
		let required_cltv =
			(outgoing_cltv_expiry as u64) + (self.effective_time_lock_delta() as u64);
		if (incoming_cltv_expiry as u64) < required_cltv {
			return Err(FailureCode::IncorrectCltvExpiry);
		}
		Ok(())
	}
}

/// Per-link configuration which is fixed for the lifetime of a [`Link`].
///
/// Default::default() provides sane defaults.
///
/// [`Link`]: crate::ln::link::Link
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkConfig {
	/// The initial forwarding policy. May be replaced later on the running link.
	pub forwarding_policy: ForwardingPolicy,
	/// The value we must keep on our side of the channel at all times and thus can never be used
	/// for outgoing HTLCs.
	///
	/// Default value: 0.
	pub channel_reserve_msat: u64,
	/// The maximum number of outgoing HTLCs we will have in flight on the link at once.
	///
	/// Default value: [`MAX_ACCEPTED_HTLCS`].
	pub max_accepted_htlcs: u16,
}

impl Default for LinkConfig {
	fn default() -> Self {
		LinkConfig {
			forwarding_policy: ForwardingPolicy::default(),
			channel_reserve_msat: 0,
			max_accepted_htlcs: MAX_ACCEPTED_HTLCS,
		}
	}
}
