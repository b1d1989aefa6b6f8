// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The [`ChannelLink`] driving a single channel.
//!
//! A [`Link`] owns a mailbox and a worker thread. Everything handed to it, by the switch through
//! [`ChannelLink::handle_switch_packet`] or by the counterparty through
//! [`ChannelLink::handle_channel_update`], is queued and then processed by the worker in order.
//! The worker is the only writer of the link's HTLC sets, bandwidth and stats.

use bitcoin::OutPoint;

use crate::ln::channel_id::ChannelId;
use crate::ln::interfaces::{ChannelLink, LinkState, LinkStats, PacketSwitch, Peer};
use crate::ln::mailbox::Mailbox;
use crate::ln::msgs::{ChannelReady, Message, UpdateAddHTLC, UpdateFailHTLC, UpdateFulfillHTLC};
use crate::ln::packet::{FailureCode, HTLCFailReason, HTLCSource, HtlcPacket, HtlcUpdate};
use crate::ln::types::PaymentHash;
use crate::util::config::{ForwardingPolicy, LinkConfig};
use crate::util::errors::APIError;
use crate::util::logger::{Logger, WithContext};
use crate::util::scid_utils::DisplayScid;

use crate::prelude::*;
use crate::sync::{Arc, Mutex};

use core::cell::Cell;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

thread_local! {
	/// Set on link worker threads, which must never wait for another link's worker.
	static IS_LINK_WORKER: Cell<bool> = Cell::new(false);
}

/// An HTLC we offered to the counterparty which it has not resolved yet.
///
/// The fee and time-lock terms are fixed when the HTLC is admitted, later changes to the link's
/// [`ForwardingPolicy`] don't touch them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingHtlc {
	/// Our id for the HTLC on this channel.
	pub htlc_id: u64,
	/// Where the HTLC came from.
	pub source: HTLCSource,
	/// The payment hash.
	pub payment_hash: PaymentHash,
	/// The amount offered.
	pub amount_msat: u64,
	/// The amount of the HTLC we received for it.
	pub incoming_amount_msat: u64,
	/// The fee the policy in force at admission required.
	pub fee_msat: u64,
	/// The expiry we offered.
	pub cltv_expiry: u32,
	/// The time-lock delta of the policy in force at admission.
	pub time_lock_delta: u16,
}

struct IncomingHtlc {
	amount_msat: u64,
}

#[derive(Default)]
struct HtlcState {
	next_outgoing_htlc_id: u64,
	outgoing: HashMap<u64, OutgoingHtlc>,
	outgoing_total_msat: u64,
	incoming: HashMap<u64, IncomingHtlc>,
}

enum LinkCommand {
	Packet(HtlcPacket),
	Message(Message),
	RestoreIncoming { htlc_id: u64, amount_msat: u64 },
}

struct LinkInner<L: Deref>
where
	L::Target: Logger,
{
	channel_id: ChannelId,
	funding_outpoint: OutPoint,
	short_channel_id: AtomicU64,
	capacity_msat: u64,
	channel_reserve_msat: u64,
	max_accepted_htlcs: u16,
	policy: Mutex<ForwardingPolicy>,

	peer: Arc<dyn Peer>,
	switch: Arc<dyn PacketSwitch>,
	mailbox: Mailbox<LinkCommand>,

	state: AtomicU8,
	torn_down: AtomicBool,
	remote_ready: AtomicBool,
	bandwidth_msat: AtomicU64,
	htlcs: Mutex<HtlcState>,

	num_updates: AtomicU64,
	total_sent_msat: AtomicU64,
	total_received_msat: AtomicU64,

	logger: L,
}

/// A [`ChannelLink`] backed by a worker thread.
///
/// Until [`ChannelLink::start`] is called updates are only queued. Once started, the link sends
/// `channel_ready` to the counterparty and becomes [`ChannelLink::eligible_to_forward`] as soon as
/// the counterparty's `channel_ready` arrives.
pub struct Link<L: Deref + Send + Sync + 'static>
where
	L::Target: Logger,
{
	inner: Arc<LinkInner<L>>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl<L: Deref + Send + Sync + 'static> Link<L>
where
	L::Target: Logger,
{
	/// Creates a link for the channel funded by `funding_outpoint` with a total capacity of
	/// `capacity_msat` on our side, talking to `peer` and handing packets to `switch`.
	pub fn new(
		funding_outpoint: OutPoint, short_channel_id: u64, capacity_msat: u64, config: LinkConfig,
		peer: Arc<dyn Peer>, switch: Arc<dyn PacketSwitch>, logger: L,
	) -> Self {
		let bandwidth = capacity_msat.saturating_sub(config.channel_reserve_msat);
		Link {
			inner: Arc::new(LinkInner {
				channel_id: ChannelId::v1_from_funding_outpoint(funding_outpoint),
				funding_outpoint,
				short_channel_id: AtomicU64::new(short_channel_id),
				capacity_msat,
				channel_reserve_msat: config.channel_reserve_msat,
				max_accepted_htlcs: config.max_accepted_htlcs,
				policy: Mutex::new(config.forwarding_policy),
				peer,
				switch,
				mailbox: Mailbox::new(),
				state: AtomicU8::new(LinkState::Created.as_u8()),
				torn_down: AtomicBool::new(false),
				remote_ready: AtomicBool::new(false),
				bandwidth_msat: AtomicU64::new(bandwidth),
				htlcs: Mutex::new(HtlcState::default()),
				num_updates: AtomicU64::new(0),
				total_sent_msat: AtomicU64::new(0),
				total_received_msat: AtomicU64::new(0),
				logger,
			}),
			worker: Mutex::new(None),
		}
	}

	/// The outpoint funding the channel.
	pub fn funding_outpoint(&self) -> OutPoint {
		self.inner.funding_outpoint
	}

	/// The channel's total capacity on our side.
	pub fn capacity_msat(&self) -> u64 {
		self.inner.capacity_msat
	}

	/// The HTLCs we offered which are not resolved yet, ordered by id.
	pub fn pending_outgoing_htlcs(&self) -> Vec<OutgoingHtlc> {
		let htlcs = self.inner.htlcs.lock().unwrap();
		let mut res: Vec<OutgoingHtlc> = htlcs.outgoing.values().cloned().collect();
		res.sort_unstable_by_key(|htlc| htlc.htlc_id);
		res
	}

	/// The number of HTLCs offered to us which we did not settle or fail yet.
	pub fn pending_incoming_htlc_count(&self) -> usize {
		self.inner.htlcs.lock().unwrap().incoming.len()
	}
}

impl<L: Deref + Send + Sync + 'static> ChannelLink for Link<L>
where
	L::Target: Logger,
{
	fn handle_switch_packet(&self, packet: HtlcPacket) {
		if let Err(LinkCommand::Packet(packet)) = self.inner.mailbox.push(LinkCommand::Packet(packet)) {
			self.inner.resolve_unprocessed(packet);
		}
	}

	fn handle_channel_update(&self, msg: Message) {
		if let Err(LinkCommand::Message(msg)) = self.inner.mailbox.push(LinkCommand::Message(msg)) {
			log_debug!(
				self.inner.logger,
				"Dropping message of type {} for stopped channel {}",
				msg.type_id(),
				self.inner.channel_id
			);
		}
	}

	fn restore_incoming_htlc(&self, htlc_id: u64, amount_msat: u64) {
		let cmd = LinkCommand::RestoreIncoming { htlc_id, amount_msat };
		if self.inner.mailbox.push(cmd).is_err() {
			log_debug!(
				self.inner.logger,
				"Not restoring incoming HTLC {} on stopped channel {}",
				htlc_id,
				self.inner.channel_id
			);
		}
	}

	fn channel_id(&self) -> ChannelId {
		self.inner.channel_id
	}

	fn short_channel_id(&self) -> u64 {
		self.inner.short_channel_id.load(Ordering::Acquire)
	}

	fn update_short_chan_id(&self, short_channel_id: u64) {
		let old = self.inner.short_channel_id.swap(short_channel_id, Ordering::AcqRel);
		log_info!(
			self.inner.logger,
			"Short channel id of channel {} changed from {} to {}",
			self.inner.channel_id,
			DisplayScid(old),
			DisplayScid(short_channel_id)
		);
	}

	fn update_forwarding_policy(&self, policy: ForwardingPolicy) {
		*self.inner.policy.lock().unwrap() = policy;
		log_debug!(self.inner.logger, "Updated forwarding policy of channel {}", self.inner.channel_id);
	}

	fn forwarding_policy(&self) -> ForwardingPolicy {
		*self.inner.policy.lock().unwrap()
	}

	fn bandwidth(&self) -> u64 {
		self.inner.bandwidth_msat.load(Ordering::Acquire)
	}

	fn stats(&self) -> LinkStats {
		LinkStats {
			num_updates: self.inner.num_updates.load(Ordering::Acquire),
			total_sent_msat: self.inner.total_sent_msat.load(Ordering::Acquire),
			total_received_msat: self.inner.total_received_msat.load(Ordering::Acquire),
		}
	}

	fn peer(&self) -> Arc<dyn Peer> {
		Arc::clone(&self.inner.peer)
	}

	fn eligible_to_forward(&self) -> bool {
		self.inner.eligible_to_forward()
	}

	fn state(&self) -> LinkState {
		self.inner.state()
	}

	fn start(&self) -> Result<(), APIError> {
		let inner = &self.inner;
		if inner
			.state
			.compare_exchange(
				LinkState::Created.as_u8(),
				LinkState::Starting.as_u8(),
				Ordering::AcqRel,
				Ordering::Acquire,
			)
			.is_err()
		{
			return Err(APIError::APIMisuseError {
				err: format!("Channel {} was already started", inner.channel_id),
			});
		}

		if inner.capacity_msat == 0 || inner.channel_reserve_msat > inner.capacity_msat {
			inner.set_state(LinkState::Stopped);
			inner.mailbox.close();
			log_error!(
				inner.logger,
				"Unable to start channel {}: capacity {} msat cannot cover reserve {} msat",
				inner.channel_id,
				inner.capacity_msat,
				inner.channel_reserve_msat
			);
			return Err(APIError::ChannelUnavailable {
				err: format!("Channel {} has no usable capacity", inner.channel_id),
			});
		}

		if let Err(e) = inner
			.peer
			.send_message(Message::ChannelReady(ChannelReady { channel_id: inner.channel_id }))
		{
			log_warn!(inner.logger, "Failed to send channel_ready for channel {}: {}", inner.channel_id, e);
		}

		let worker_inner = Arc::clone(inner);
		let handle = thread::Builder::new()
			.name(format!("link-{}", DisplayScid(self.short_channel_id())))
			.spawn(move || worker_inner.run());
		match handle {
			Ok(handle) => *self.worker.lock().unwrap() = Some(handle),
			Err(e) => {
				inner.set_state(LinkState::Stopped);
				inner.mailbox.close();
				return Err(APIError::ChannelUnavailable {
					err: format!("Unable to spawn worker for channel {}: {}", inner.channel_id, e),
				});
			},
		}

		inner.set_state(LinkState::Active);
		log_info!(
			inner.logger,
			"Started channel {} with short id {}",
			inner.channel_id,
			DisplayScid(self.short_channel_id())
		);
		Ok(())
	}

	fn stop(&self) {
		let inner = &self.inner;
		let mut state = inner.state.load(Ordering::Acquire);
		loop {
			if state >= LinkState::Stopping.as_u8() {
				return;
			}
			match inner.state.compare_exchange(
				state,
				LinkState::Stopping.as_u8(),
				Ordering::AcqRel,
				Ordering::Acquire,
			) {
				Ok(_) => break,
				Err(actual) => state = actual,
			}
		}
		log_info!(inner.logger, "Stopping channel {}", inner.channel_id);

		inner.mailbox.close();
		if let Some(handle) = self.worker.lock().unwrap().take() {
			let own_worker = handle.thread().id() == thread::current().id();
			if !own_worker && IS_LINK_WORKER.with(|is_worker| is_worker.get()) {
				// Our worker may be blocked on the calling worker, so we can't join it here. It tears
				// the link down by itself once it sees the closed mailbox.
				log_debug!(inner.logger, "Leaving teardown of channel {} to its worker", inner.channel_id);
				return;
			}
			if !own_worker && handle.join().is_err() {
				log_error!(inner.logger, "Worker for channel {} panicked", inner.channel_id);
			}
		}
		inner.tear_down();
	}
}

impl<L: Deref + Send + Sync + 'static> Drop for Link<L>
where
	L::Target: Logger,
{
	fn drop(&mut self) {
		if self.inner.state() != LinkState::Created {
			self.stop();
		}
	}
}

impl<L: Deref> LinkInner<L>
where
	L::Target: Logger,
{
	fn state(&self) -> LinkState {
		LinkState::from_u8(self.state.load(Ordering::Acquire))
	}

	fn set_state(&self, state: LinkState) {
		self.state.store(state.as_u8(), Ordering::Release);
	}

	fn eligible_to_forward(&self) -> bool {
		self.state() == LinkState::Active && self.remote_ready.load(Ordering::Acquire)
	}

	fn update_bandwidth(&self, outgoing_total_msat: u64) {
		let bandwidth = self
			.capacity_msat
			.saturating_sub(outgoing_total_msat)
			.saturating_sub(self.channel_reserve_msat);
		self.bandwidth_msat.store(bandwidth, Ordering::Release);
	}

	fn run(&self) {
		IS_LINK_WORKER.with(|is_worker| is_worker.set(true));
		while let Some(cmd) = self.mailbox.next() {
			match cmd {
				LinkCommand::Packet(packet) => self.handle_downstream_packet(packet),
				LinkCommand::Message(msg) => self.handle_upstream_message(msg),
				LinkCommand::RestoreIncoming { htlc_id, amount_msat } => {
					self.restore_incoming(htlc_id, amount_msat)
				},
			}
		}
		log_trace!(self.logger, "Worker for channel {} exiting", self.channel_id);
		self.tear_down();
	}

	/// Resolves whatever is left on a stopping link: queued resolutions from the counterparty are
	/// still applied, queued packets from the switch are handed back, and every outgoing HTLC
	/// still in flight is failed back. Only the first call does anything.
	fn tear_down(&self) {
		if self.torn_down.swap(true, Ordering::AcqRel) {
			return;
		}
		for cmd in self.mailbox.drain() {
			match cmd {
				LinkCommand::Packet(packet) => self.resolve_unprocessed(packet),
				LinkCommand::Message(msg @ Message::UpdateFulfillHTLC(_))
				| LinkCommand::Message(msg @ Message::UpdateFailHTLC(_)) => self.handle_upstream_message(msg),
				LinkCommand::Message(msg) => {
					log_trace!(
						self.logger,
						"Discarding queued message of type {} on stopping channel {}",
						msg.type_id(),
						self.channel_id
					);
				},
				LinkCommand::RestoreIncoming { .. } => {},
			}
		}

		let in_flight = {
			let mut htlcs = self.htlcs.lock().unwrap();
			let mut in_flight: Vec<OutgoingHtlc> = htlcs.outgoing.drain().map(|(_, htlc)| htlc).collect();
			htlcs.outgoing_total_msat = 0;
			self.update_bandwidth(0);
			in_flight.sort_unstable_by_key(|htlc| htlc.htlc_id);
			in_flight
		};
		for htlc in in_flight {
			let logger = WithContext::from(&self.logger, Some(self.channel_id), Some(htlc.payment_hash));
			log_debug!(logger, "Failing back in-flight HTLC {} of stopping channel", htlc.htlc_id);
			self.switch.forward(HtlcPacket::fail(
				htlc.source,
				htlc.payment_hash,
				htlc.amount_msat,
				HTLCFailReason::from_failure_code(FailureCode::PermanentChannelFailure),
			));
		}

		if let Err(e) = self.peer.wipe_channel(&self.funding_outpoint) {
			log_warn!(self.logger, "Failed to wipe channel {} from peer: {}", self.channel_id, e);
		}
		self.set_state(LinkState::Stopped);
		log_info!(self.logger, "Stopped channel {}", self.channel_id);
	}

	/// Tears the connection down and lets the switch fail back everything pending with the peer,
	/// this link included.
	fn handle_transport_failure(&self, reason: &str) {
		self.peer.disconnect(reason);
		self.switch.peer_disconnected(&self.peer.pub_key());
	}

	/// Tracks an HTLC the counterparty offered before this link was registered, so its resolution
	/// can still be sent.
	fn restore_incoming(&self, htlc_id: u64, amount_msat: u64) {
		self.htlcs.lock().unwrap().incoming.entry(htlc_id).or_insert(IncomingHtlc { amount_msat });
		log_debug!(self.logger, "Restored incoming HTLC {} on channel {}", htlc_id, self.channel_id);
	}

	/// Resolves a packet the worker never got to: adds are failed back to the switch, settles and
	/// fails are left with the switch to deliver once the channel is back.
	fn resolve_unprocessed(&self, packet: HtlcPacket) {
		if packet.is_add() {
			log_debug!(self.logger, "Failing back {} on stopped channel {}", log_packet!(packet), self.channel_id);
			self.switch.forward(
				packet.into_fail(HTLCFailReason::from_failure_code(FailureCode::PermanentChannelFailure)),
			);
		} else {
			log_debug!(self.logger, "Parking {} for stopped channel {}", log_packet!(packet), self.channel_id);
			self.switch.park_resolution(self.channel_id, packet);
		}
	}

	fn fail_back(&self, packet: HtlcPacket, failure_code: FailureCode) {
		let logger = WithContext::from(&self.logger, Some(self.channel_id), Some(*packet.payment_hash()));
		log_debug!(logger, "Refusing {}: {}", log_packet!(packet), failure_code);
		self.switch.forward(packet.into_fail(HTLCFailReason::from_failure_code(failure_code)));
	}

	fn handle_downstream_packet(&self, packet: HtlcPacket) {
		if packet.is_add() {
			return self.offer_htlc(packet);
		}
		let (payment_preimage, reason) = match packet.update() {
			HtlcUpdate::Add { .. } => return,
			HtlcUpdate::Settle { payment_preimage } => (Some(*payment_preimage), None),
			HtlcUpdate::Fail { reason } => (None, Some(reason.to_wire_reason())),
		};
		let logger = WithContext::from(&self.logger, Some(self.channel_id), Some(*packet.payment_hash()));

		let htlc_id = match packet.source() {
			HTLCSource::PreviousHop { channel_id, htlc_id } if *channel_id == self.channel_id => *htlc_id,
			_ => {
				log_error!(logger, "Got {} which doesn't belong to this channel", log_packet!(packet));
				return;
			},
		};
		let incoming_amount_msat = match self.htlcs.lock().unwrap().incoming.get(&htlc_id) {
			Some(htlc) => htlc.amount_msat,
			None => {
				log_debug!(logger, "Dropping {}: HTLC {} is not pending", log_packet!(packet), htlc_id);
				return;
			},
		};

		let settled = payment_preimage.is_some();
		let msg = match (payment_preimage, reason) {
			(Some(payment_preimage), _) => Message::UpdateFulfillHTLC(UpdateFulfillHTLC {
				channel_id: self.channel_id,
				htlc_id,
				payment_preimage,
			}),
			(None, reason) => Message::UpdateFailHTLC(UpdateFailHTLC {
				channel_id: self.channel_id,
				htlc_id,
				reason: reason.unwrap_or_default(),
			}),
		};
		log_trace!(logger, "Resolving incoming HTLC {} with {}", htlc_id, log_packet!(packet));
		if let Err(e) = self.peer.send_message(msg) {
			log_error!(logger, "Failed to resolve incoming HTLC {} with peer: {}", htlc_id, e);
			self.handle_transport_failure("failed to send HTLC resolution");
			self.switch.park_resolution(self.channel_id, packet);
			return;
		}

		self.htlcs.lock().unwrap().incoming.remove(&htlc_id);
		self.num_updates.fetch_add(1, Ordering::AcqRel);
		if settled {
			self.total_received_msat.fetch_add(incoming_amount_msat, Ordering::AcqRel);
		}
	}

	fn offer_htlc(&self, packet: HtlcPacket) {
		let (outgoing_cltv_expiry, onion) = match packet.update() {
			HtlcUpdate::Add { outgoing_cltv_expiry, onion, .. } => (*outgoing_cltv_expiry, onion.clone()),
			_ => return,
		};
		if !self.eligible_to_forward() {
			return self.fail_back(packet, FailureCode::ChannelDisabled);
		}
		let policy = *self.policy.lock().unwrap();
		if let Err(failure_code) = policy.check_htlc_amount(packet.amount_msat()) {
			return self.fail_back(packet, failure_code);
		}

		let htlc_id = {
			let mut htlcs = self.htlcs.lock().unwrap();
			if htlcs.outgoing.len() >= self.max_accepted_htlcs as usize {
				core::mem::drop(htlcs);
				return self.fail_back(packet, FailureCode::TemporaryChannelFailure);
			}
			let available = self
				.capacity_msat
				.saturating_sub(htlcs.outgoing_total_msat)
				.saturating_sub(self.channel_reserve_msat);
			if packet.amount_msat() > available {
				core::mem::drop(htlcs);
				return self.fail_back(packet, FailureCode::TemporaryChannelFailure);
			}
			let htlc_id = htlcs.next_outgoing_htlc_id;
			htlcs.next_outgoing_htlc_id += 1;
			htlcs.outgoing.insert(
				htlc_id,
				OutgoingHtlc {
					htlc_id,
					source: *packet.source(),
					payment_hash: *packet.payment_hash(),
					amount_msat: packet.amount_msat(),
					incoming_amount_msat: packet.incoming_amount_msat(),
					fee_msat: policy.fee_for(packet.amount_msat()),
					cltv_expiry: outgoing_cltv_expiry,
					time_lock_delta: policy.effective_time_lock_delta(),
				},
			);
			htlcs.outgoing_total_msat += packet.amount_msat();
			self.update_bandwidth(htlcs.outgoing_total_msat);
			htlc_id
		};
		self.num_updates.fetch_add(1, Ordering::AcqRel);

		let logger = WithContext::from(&self.logger, Some(self.channel_id), Some(*packet.payment_hash()));
		log_debug!(logger, "Offering {} as HTLC {}", log_packet!(packet), htlc_id);
		let msg = Message::UpdateAddHTLC(UpdateAddHTLC {
			channel_id: self.channel_id,
			htlc_id,
			amount_msat: packet.amount_msat(),
			payment_hash: *packet.payment_hash(),
			cltv_expiry: outgoing_cltv_expiry,
			onion_routing_packet: onion,
		});
		if let Err(e) = self.peer.send_message(msg) {
			log_error!(logger, "Failed to offer HTLC {} to peer: {}", htlc_id, e);
			if self.remove_outgoing(htlc_id).is_some() {
				self.fail_back(packet, FailureCode::TemporaryChannelFailure);
			}
			self.handle_transport_failure("failed to send update_add_htlc");
		}
	}

	fn remove_outgoing(&self, htlc_id: u64) -> Option<OutgoingHtlc> {
		let mut htlcs = self.htlcs.lock().unwrap();
		let htlc = htlcs.outgoing.remove(&htlc_id)?;
		htlcs.outgoing_total_msat -= htlc.amount_msat;
		self.update_bandwidth(htlcs.outgoing_total_msat);
		Some(htlc)
	}

	fn handle_upstream_message(&self, msg: Message) {
		if msg.channel_id() != self.channel_id {
			log_warn!(
				self.logger,
				"Channel {} got a message of type {} for channel {}",
				self.channel_id,
				msg.type_id(),
				msg.channel_id()
			);
			return;
		}
		match msg {
			Message::ChannelReady(_) => {
				if !self.remote_ready.swap(true, Ordering::AcqRel) {
					log_info!(self.logger, "Channel {} is ready to forward", self.channel_id);
				}
			},
			Message::UpdateAddHTLC(msg) => self.receive_htlc(msg),
			Message::UpdateFulfillHTLC(msg) => {
				let logger = WithContext::from(&self.logger, Some(self.channel_id), None);
				let payment_hash = match self.htlcs.lock().unwrap().outgoing.get(&msg.htlc_id) {
					Some(htlc) => htlc.payment_hash,
					None => {
						log_warn!(logger, "Ignoring fulfill for unknown HTLC {}", msg.htlc_id);
						return;
					},
				};
				if !msg.payment_preimage.matches(&payment_hash) {
					log_warn!(logger, "Ignoring fulfill for HTLC {} with a bad preimage", msg.htlc_id);
					return;
				}
				let htlc = match self.remove_outgoing(msg.htlc_id) {
					Some(htlc) => htlc,
					None => return,
				};
				self.num_updates.fetch_add(1, Ordering::AcqRel);
				self.total_sent_msat.fetch_add(htlc.amount_msat, Ordering::AcqRel);
				log_debug!(logger, "HTLC {} was fulfilled", msg.htlc_id);
				self.switch.forward(HtlcPacket::settle(
					htlc.source,
					htlc.payment_hash,
					htlc.amount_msat,
					msg.payment_preimage,
				));
			},
			Message::UpdateFailHTLC(msg) => {
				let logger = WithContext::from(&self.logger, Some(self.channel_id), None);
				let htlc = match self.remove_outgoing(msg.htlc_id) {
					Some(htlc) => htlc,
					None => {
						log_warn!(logger, "Ignoring fail for unknown HTLC {}", msg.htlc_id);
						return;
					},
				};
				self.num_updates.fetch_add(1, Ordering::AcqRel);
				log_debug!(logger, "HTLC {} was failed", msg.htlc_id);
				self.switch.forward(HtlcPacket::fail(
					htlc.source,
					htlc.payment_hash,
					htlc.amount_msat,
					HTLCFailReason::from_wire_reason(msg.reason),
				));
			},
		}
	}

	fn receive_htlc(&self, msg: UpdateAddHTLC) {
		let logger = WithContext::from(&self.logger, Some(self.channel_id), Some(msg.payment_hash));
		let refuse = |failure_code: FailureCode| {
			log_debug!(logger, "Refusing incoming HTLC {}: {}", msg.htlc_id, failure_code);
			let fail = Message::UpdateFailHTLC(UpdateFailHTLC {
				channel_id: self.channel_id,
				htlc_id: msg.htlc_id,
				reason: HTLCFailReason::from_failure_code(failure_code).to_wire_reason(),
			});
			if let Err(e) = self.peer.send_message(fail) {
				log_error!(logger, "Failed to refuse incoming HTLC {}: {}", msg.htlc_id, e);
				self.handle_transport_failure("failed to send update_fail_htlc");
			}
		};
		if !self.eligible_to_forward() {
			return refuse(FailureCode::ChannelDisabled);
		}
		let (hop, onion) = match msg.onion_routing_packet.clone().peel() {
			Some(res) => res,
			None => return refuse(FailureCode::InvalidOnionPayload),
		};
		{
			let mut htlcs = self.htlcs.lock().unwrap();
			if htlcs.incoming.contains_key(&msg.htlc_id) {
				core::mem::drop(htlcs);
				log_warn!(logger, "Ignoring duplicate add for HTLC {}", msg.htlc_id);
				return;
			}
			htlcs.incoming.insert(msg.htlc_id, IncomingHtlc { amount_msat: msg.amount_msat });
		}
		self.num_updates.fetch_add(1, Ordering::AcqRel);

		let packet = HtlcPacket::add(
			HTLCSource::PreviousHop { channel_id: self.channel_id, htlc_id: msg.htlc_id },
			msg.payment_hash,
			msg.amount_msat,
			msg.cltv_expiry,
			&hop,
			onion,
		);
		log_trace!(logger, "Received {}", log_packet!(packet));
		self.switch.forward(packet);
	}
}
