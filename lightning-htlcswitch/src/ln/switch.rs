// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The [`Switch`] routes HTLCs between the links of a node.
//!
//! Adds arriving on one link are handed to the link named by their next hop, or to the
//! [`InvoiceDatabase`] if we are the final hop. Settles and fails travel the same way back. Every
//! add the switch accepts opens a circuit keyed by its [`HTLCSource`], and the first settle or
//! fail for that source closes it, so each add is resolved exactly once no matter how many times
//! a resolution is replayed.

use bitcoin::secp256k1::PublicKey;

use crate::ln::channel_id::ChannelId;
use crate::ln::interfaces::{ChannelLink, InvoiceDatabase, LinkState, PacketSwitch};
use crate::ln::msgs::{HopPayload, OnionPacket};
use crate::ln::packet::{FailureCode, HTLCFailReason, HTLCSource, HtlcPacket, HtlcUpdate};
use crate::ln::types::PaymentHash;
use crate::util::atomic_counter::AtomicCounter;
use crate::util::errors::APIError;
use crate::util::events::{Event, EventHandler};
use crate::util::logger::{Logger, WithContext};
use crate::util::scid_utils::DisplayScid;

use crate::prelude::*;
use crate::sync::{Arc, FairRwLock, Mutex};

use core::ops::Deref;
use core::sync::atomic::{AtomicBool, Ordering};

/// The routing index. Both maps live behind the same lock so a lookup never sees a short channel
/// id pointing at a channel which is not registered.
struct LinkIndex {
	by_id: HashMap<ChannelId, Arc<dyn ChannelLink>>,
	short_to_id: HashMap<u64, ChannelId>,
}

impl LinkIndex {
	fn by_scid(&self, short_channel_id: u64) -> Option<&Arc<dyn ChannelLink>> {
		self.short_to_id.get(&short_channel_id).and_then(|channel_id| self.by_id.get(channel_id))
	}
}

/// An add we handed onwards and have not seen resolved yet.
struct Circuit {
	payment_hash: PaymentHash,
	incoming_amount_msat: u64,
	outgoing_amount_msat: u64,
	outgoing_channel_id: Option<ChannelId>,
}

/// Routes HTLC packets between registered [`ChannelLink`]s.
///
/// Links hold the switch as an `Arc<dyn PacketSwitch>` and the switch holds its registered links,
/// so [`Switch::stop`] (or [`Switch::remove_link`] for each link) must be called to tear the node
/// down.
///
/// Lock order is index, then circuits, then parked resolutions. The switch never calls into a
/// link while holding any of them, except for [`ChannelLink::update_short_chan_id`] and
/// [`ChannelLink::restore_incoming_htlc`] which are called with the index write lock held.
pub struct Switch<I: Deref + Send + Sync, L: Deref + Send + Sync>
where
	I::Target: InvoiceDatabase,
	L::Target: Logger,
{
	index: FairRwLock<LinkIndex>,
	circuits: Mutex<HashMap<HTLCSource, Circuit>>,
	parked_resolutions: Mutex<HashMap<ChannelId, Vec<HtlcPacket>>>,
	pending_events: Mutex<Vec<Event>>,
	next_payment_id: AtomicCounter,
	stopped: AtomicBool,

	invoices: I,
	logger: L,
}

impl<I: Deref + Send + Sync, L: Deref + Send + Sync> Switch<I, L>
where
	I::Target: InvoiceDatabase,
	L::Target: Logger,
{
	/// Constructs a new, empty switch settling HTLCs paying us against `invoices`.
	pub fn new(invoices: I, logger: L) -> Self {
		Switch {
			index: FairRwLock::new(LinkIndex { by_id: HashMap::new(), short_to_id: HashMap::new() }),
			circuits: Mutex::new(HashMap::new()),
			parked_resolutions: Mutex::new(HashMap::new()),
			pending_events: Mutex::new(Vec::new()),
			next_payment_id: AtomicCounter::new(),
			stopped: AtomicBool::new(false),
			invoices,
			logger,
		}
	}

	/// Starts `link` and registers it.
	///
	/// Fails with [`APIError::APIMisuseError`] if a link for the same channel, or with the same
	/// short channel id, is already registered, or the switch was stopped. Errors from
	/// [`ChannelLink::start`] are passed through and the link is not registered.
	///
	/// The link is told about every HTLC it was offered while the channel was registered before
	/// and which is not resolved yet, so settles and fails for them reach the counterparty. Any
	/// settles or fails which were waiting for this channel are then handed to the link.
	pub fn add_link(&self, link: Arc<dyn ChannelLink>) -> Result<(), APIError> {
		let channel_id = link.channel_id();
		if self.stopped.load(Ordering::Acquire) {
			return Err(APIError::APIMisuseError { err: "Switch was stopped".to_owned() });
		}
		if self.index.read().unwrap().by_id.contains_key(&channel_id) {
			return Err(APIError::APIMisuseError {
				err: format!("Channel {} is already registered", channel_id),
			});
		}

		link.start()?;

		let short_channel_id = link.short_channel_id();
		let parked = {
			let mut index = self.index.write().unwrap();
			let conflict = if index.by_id.contains_key(&channel_id) {
				Some(format!("Channel {} is already registered", channel_id))
			} else if short_channel_id != 0 && index.short_to_id.contains_key(&short_channel_id) {
				Some(format!("Short channel id {} is already in use", DisplayScid(short_channel_id)))
			} else if self.stopped.load(Ordering::Acquire) {
				Some("Switch was stopped".to_owned())
			} else {
				None
			};
			if let Some(err) = conflict {
				core::mem::drop(index);
				link.stop();
				return Err(APIError::APIMisuseError { err });
			}
			let mut restored: Vec<(u64, u64)> = self
				.circuits
				.lock()
				.unwrap()
				.iter()
				.filter_map(|(source, circuit)| match source {
					HTLCSource::PreviousHop { channel_id: id, htlc_id } if *id == channel_id => {
						Some((*htlc_id, circuit.incoming_amount_msat))
					},
					_ => None,
				})
				.collect();
			let parked = self.parked_resolutions.lock().unwrap().remove(&channel_id).unwrap_or_default();
			for packet in parked.iter() {
				if let HTLCSource::PreviousHop { htlc_id, .. } = packet.source() {
					restored.push((*htlc_id, packet.incoming_amount_msat()));
				}
			}
			// Queued ahead of anything a lookup can hand the link once it is in the index.
			restored.sort_unstable();
			for (htlc_id, amount_msat) in restored {
				link.restore_incoming_htlc(htlc_id, amount_msat);
			}

			index.by_id.insert(channel_id, Arc::clone(&link));
			if short_channel_id != 0 {
				index.short_to_id.insert(short_channel_id, channel_id);
			}
			parked
		};

		log_info!(
			self.logger,
			"Registered channel {} with short id {}",
			channel_id,
			DisplayScid(short_channel_id)
		);
		if !parked.is_empty() {
			log_debug!(
				self.logger,
				"Handing {} parked resolutions to channel {}",
				parked.len(),
				channel_id
			);
		}
		for packet in parked {
			link.handle_switch_packet(packet);
		}
		Ok(())
	}

	/// Unregisters the link for `channel_id` and stops it, which fails back every HTLC still in
	/// flight over it.
	pub fn remove_link(&self, channel_id: &ChannelId) -> Result<(), APIError> {
		let link = {
			let mut index = self.index.write().unwrap();
			let link = match index.by_id.remove(channel_id) {
				Some(link) => link,
				None => {
					return Err(APIError::APIMisuseError {
						err: format!("Channel {} is not registered", channel_id),
					})
				},
			};
			index.short_to_id.retain(|_, id| id != channel_id);
			link
		};
		log_info!(self.logger, "Removed channel {}", channel_id);
		link.stop();
		Ok(())
	}

	/// Moves the link for `channel_id` to `short_channel_id`. The old short id stops resolving and
	/// the new one starts resolving in the same critical section.
	///
	/// Fails with [`APIError::APIMisuseError`] if the channel is not registered or the new short
	/// id belongs to another channel, in which case nothing changes.
	pub fn update_short_chan_id(
		&self, channel_id: &ChannelId, short_channel_id: u64,
	) -> Result<(), APIError> {
		let mut index = self.index.write().unwrap();
		let link = match index.by_id.get(channel_id) {
			Some(link) => Arc::clone(link),
			None => {
				return Err(APIError::APIMisuseError {
					err: format!("Channel {} is not registered", channel_id),
				})
			},
		};
		if let Some(owner) = index.short_to_id.get(&short_channel_id) {
			if owner != channel_id {
				return Err(APIError::APIMisuseError {
					err: format!(
						"Short channel id {} is already in use by channel {}",
						DisplayScid(short_channel_id),
						owner
					),
				});
			}
		}
		let old_short_channel_id = link.short_channel_id();
		link.update_short_chan_id(short_channel_id);
		if index.short_to_id.get(&old_short_channel_id) == Some(channel_id) {
			index.short_to_id.remove(&old_short_channel_id);
		}
		if short_channel_id != 0 {
			index.short_to_id.insert(short_channel_id, *channel_id);
		}
		Ok(())
	}

	/// The link registered for `channel_id`.
	pub fn get_link(&self, channel_id: &ChannelId) -> Option<Arc<dyn ChannelLink>> {
		self.index.read().unwrap().by_id.get(channel_id).cloned()
	}

	/// The link currently registered under `short_channel_id`.
	pub fn get_link_by_scid(&self, short_channel_id: u64) -> Option<Arc<dyn ChannelLink>> {
		self.index.read().unwrap().by_scid(short_channel_id).cloned()
	}

	/// All registered links.
	pub fn list_links(&self) -> Vec<Arc<dyn ChannelLink>> {
		self.index.read().unwrap().by_id.values().cloned().collect()
	}

	/// Sends a payment of `amount_msat` over the channel `first_hop_scid`, expiring at
	/// `cltv_expiry`. `onion` is handed to the first hop.
	///
	/// Returns the id which the resulting [`Event::PaymentSent`] or [`Event::PaymentFailed`] will
	/// carry. Failures, including the first hop not existing, are only reported through that
	/// event.
	pub fn send_htlc(
		&self, first_hop_scid: u64, amount_msat: u64, payment_hash: PaymentHash, cltv_expiry: u32,
		onion: OnionPacket,
	) -> u64 {
		let payment_id = self.next_payment_id.next();
		let hop = HopPayload {
			short_channel_id: first_hop_scid,
			amt_to_forward: amount_msat,
			outgoing_cltv_value: cltv_expiry,
		};
		let logger = WithContext::from(&self.logger, None, Some(payment_hash));
		log_debug!(
			logger,
			"Sending payment {} of {} msat over {}",
			payment_id,
			amount_msat,
			DisplayScid(first_hop_scid)
		);
		self.forward(HtlcPacket::add(
			HTLCSource::LocalPayment { payment_id },
			payment_hash,
			amount_msat,
			cltv_expiry,
			&hop,
			onion,
		));
		payment_id
	}

	/// Routes `packet`: adds go to the link named by their next hop (or to our invoices), settles
	/// and fails go to [`Switch::handle_settle_or_fail`].
	///
	/// Never blocks on link processing. An add which cannot be routed is failed back right away.
	pub fn forward(&self, packet: HtlcPacket) {
		if !packet.is_add() {
			return self.handle_settle_or_fail(packet);
		}
		let logger = WithContext::from(&self.logger, None, Some(*packet.payment_hash()));

		{
			let mut circuits = self.circuits.lock().unwrap();
			match circuits.entry(*packet.source()) {
				hash_map::Entry::Occupied(_) => {
					core::mem::drop(circuits);
					log_warn!(logger, "Dropping duplicate {}", log_packet!(packet));
					return;
				},
				hash_map::Entry::Vacant(entry) => {
					entry.insert(Circuit {
						payment_hash: *packet.payment_hash(),
						incoming_amount_msat: packet.incoming_amount_msat(),
						outgoing_amount_msat: packet.amount_msat(),
						outgoing_channel_id: None,
					});
				},
			}
		}

		let short_channel_id = packet.outgoing_short_channel_id();
		if short_channel_id == 0 {
			return self.handle_exit_hop(packet);
		}

		let link = self.index.read().unwrap().by_scid(short_channel_id).cloned();
		let link = match link {
			Some(link) => link,
			None => return self.fail_htlc(packet, FailureCode::UnknownNextPeer),
		};
		if !link.eligible_to_forward() {
			return self.fail_htlc(packet, FailureCode::ChannelDisabled);
		}
		// Our own payments pay no fee to ourselves.
		let policy_check = match (packet.source(), packet.update()) {
			(
				HTLCSource::PreviousHop { .. },
				HtlcUpdate::Add { incoming_cltv_expiry, outgoing_cltv_expiry, .. },
			) => link.check_htlc_forward(
				packet.incoming_amount_msat(),
				packet.amount_msat(),
				*incoming_cltv_expiry,
				*outgoing_cltv_expiry,
			),
			_ => Ok(()),
		};
		if let Err(failure_code) = policy_check {
			return self.fail_htlc(packet, failure_code);
		}
		if packet.amount_msat() > link.bandwidth() {
			return self.fail_htlc(packet, FailureCode::TemporaryChannelFailure);
		}

		if let Some(circuit) = self.circuits.lock().unwrap().get_mut(packet.source()) {
			circuit.outgoing_channel_id = Some(link.channel_id());
		}
		log_trace!(logger, "Forwarding {} to channel {}", log_packet!(packet), link.channel_id());
		link.handle_switch_packet(packet);
	}

	fn handle_exit_hop(&self, packet: HtlcPacket) {
		let payment_hash = *packet.payment_hash();
		let logger = WithContext::from(&self.logger, None, Some(payment_hash));
		let invoice = match self.invoices.lookup_invoice(&payment_hash) {
			Ok(invoice) => invoice,
			Err(e) => {
				log_debug!(logger, "Refusing HTLC paying us: {}", e);
				return self.fail_htlc(packet, FailureCode::IncorrectOrUnknownPaymentDetails);
			},
		};
		if packet.incoming_amount_msat() < invoice.value_msat {
			log_debug!(
				logger,
				"Refusing HTLC of {} msat paying invoice of {} msat",
				packet.incoming_amount_msat(),
				invoice.value_msat
			);
			return self.fail_htlc(packet, FailureCode::IncorrectOrUnknownPaymentDetails);
		}
		if let Err(e) = self.invoices.settle_invoice(&payment_hash) {
			log_debug!(logger, "Refusing HTLC paying us: {}", e);
			return self.fail_htlc(packet, FailureCode::IncorrectOrUnknownPaymentDetails);
		}
		log_info!(logger, "Claimed payment of {} msat", packet.incoming_amount_msat());
		self.pending_events.lock().unwrap().push(Event::PaymentClaimed {
			payment_hash,
			amount_msat: packet.incoming_amount_msat(),
		});
		self.handle_settle_or_fail(packet.into_settle(invoice.payment_preimage));
	}

	fn fail_htlc(&self, packet: HtlcPacket, failure_code: FailureCode) {
		let logger = WithContext::from(&self.logger, None, Some(*packet.payment_hash()));
		log_debug!(logger, "Failing {}: {}", log_packet!(packet), failure_code);
		self.handle_settle_or_fail(packet.into_fail(HTLCFailReason::from_failure_code(failure_code)));
	}

	/// Resolves the circuit `packet` belongs to and hands `packet` back towards the origin of the
	/// HTLC. Resolutions for an already resolved (or unknown) circuit are dropped.
	///
	/// If the link the HTLC arrived on is no longer registered the packet is parked until a link
	/// for that channel is registered again.
	pub fn handle_settle_or_fail(&self, packet: HtlcPacket) {
		let logger = WithContext::from(&self.logger, None, Some(*packet.payment_hash()));
		if packet.is_add() {
			log_error!(logger, "Got {} where a settle or fail was expected", log_packet!(packet));
			return;
		}
		let circuit = match self.circuits.lock().unwrap().remove(packet.source()) {
			Some(circuit) => circuit,
			None => {
				log_trace!(logger, "Dropping {} for a resolved circuit", log_packet!(packet));
				return;
			},
		};

		let source = *packet.source();
		match source {
			HTLCSource::LocalPayment { payment_id } => {
				let event = match packet.update() {
					HtlcUpdate::Settle { payment_preimage } => {
						log_info!(logger, "Payment {} was sent", payment_id);
						Event::PaymentSent {
							payment_id,
							payment_hash: circuit.payment_hash,
							payment_preimage: *payment_preimage,
						}
					},
					HtlcUpdate::Fail { reason } => {
						log_info!(logger, "Payment {} failed", payment_id);
						Event::PaymentFailed {
							payment_id,
							payment_hash: circuit.payment_hash,
							failure_code: reason.failure_code(),
						}
					},
					HtlcUpdate::Add { .. } => return,
				};
				self.pending_events.lock().unwrap().push(event);
			},
			HTLCSource::PreviousHop { channel_id, .. } => {
				match packet.update() {
					HtlcUpdate::Settle { .. } => {
						if let Some(next_channel_id) = circuit.outgoing_channel_id {
							let fee_earned_msat =
								circuit.incoming_amount_msat.saturating_sub(circuit.outgoing_amount_msat);
							log_info!(
								logger,
								"Forwarded {} msat from {} to {}, earning {} msat",
								circuit.outgoing_amount_msat,
								channel_id,
								next_channel_id,
								fee_earned_msat
							);
							self.pending_events.lock().unwrap().push(Event::PaymentForwarded {
								prev_channel_id: channel_id,
								next_channel_id,
								payment_hash: circuit.payment_hash,
								outgoing_amount_msat: circuit.outgoing_amount_msat,
								fee_earned_msat,
							});
						}
					},
					HtlcUpdate::Fail { reason } => {
						if let Some(failure_code) = reason.failure_code() {
							self.pending_events.lock().unwrap().push(Event::HTLCHandlingFailed {
								prev_channel_id: channel_id,
								payment_hash: circuit.payment_hash,
								failure_code,
							});
						}
					},
					HtlcUpdate::Add { .. } => return,
				}

				let packet = packet.with_incoming_amount_msat(circuit.incoming_amount_msat);
				let link = self.index.read().unwrap().by_id.get(&channel_id).cloned();
				match link {
					Some(link) => link.handle_switch_packet(packet),
					None => self.park_resolution(channel_id, packet),
				}
			},
		}
	}

	/// Keeps `packet` until a link for `channel_id` is registered and running. Delivers it right
	/// away if one already is.
	pub fn park_resolution(&self, channel_id: ChannelId, packet: HtlcPacket) {
		let link = {
			let index = self.index.read().unwrap();
			match index.by_id.get(&channel_id) {
				Some(link) if link.state() == LinkState::Active => Arc::clone(link),
				_ => {
					let logger = WithContext::from(&self.logger, Some(channel_id), Some(*packet.payment_hash()));
					log_debug!(logger, "Parking {} until the channel is back", log_packet!(packet));
					self.parked_resolutions
						.lock()
						.unwrap()
						.entry(channel_id)
						.or_insert_with(Vec::new)
						.push(packet);
					return;
				},
			}
		};
		link.handle_switch_packet(packet);
	}

	/// Unregisters every link whose counterparty is `their_node_id` and stops them, failing back
	/// whatever was in flight over them.
	pub fn peer_disconnected(&self, their_node_id: &PublicKey) {
		let channel_ids: Vec<ChannelId> = self
			.index
			.read()
			.unwrap()
			.by_id
			.values()
			.filter(|link| link.peer().pub_key() == *their_node_id)
			.map(|link| link.channel_id())
			.collect();
		log_info!(
			self.logger,
			"Peer {} disconnected, removing {} channels",
			their_node_id,
			channel_ids.len()
		);
		for channel_id in channel_ids {
			match self.remove_link(&channel_id) {
				Ok(()) => {},
				// Removed concurrently, e.g. by another link to the same peer noticing first.
				Err(APIError::APIMisuseError { .. }) if self.get_link(&channel_id).is_none() => {
					log_trace!(self.logger, "Channel {} was already removed", channel_id);
				},
				Err(e) => {
					log_error!(self.logger, "Failed to remove channel {}: {:?}", channel_id, e);
				},
			}
		}
	}

	/// The number of adds which were routed but not resolved yet.
	pub fn pending_circuit_count(&self) -> usize {
		self.circuits.lock().unwrap().len()
	}

	/// The number of resolutions waiting for their channel to come back.
	pub fn parked_resolution_count(&self) -> usize {
		self.parked_resolutions.lock().unwrap().values().map(|packets| packets.len()).sum()
	}

	/// Takes the resolutions waiting for `channel_id`, e.g. once the channel is known to be closed
	/// for good and its HTLCs have to be resolved some other way.
	pub fn take_parked_resolutions(&self, channel_id: &ChannelId) -> Vec<HtlcPacket> {
		self.parked_resolutions.lock().unwrap().remove(channel_id).unwrap_or_default()
	}

	/// Takes every event generated since the last call.
	pub fn get_and_clear_pending_events(&self) -> Vec<Event> {
		core::mem::take(&mut *self.pending_events.lock().unwrap())
	}

	/// Hands every event generated since the last call to `handler`, in order.
	pub fn process_pending_events<H: EventHandler>(&self, handler: H) {
		for event in self.get_and_clear_pending_events() {
			handler.handle_event(event);
		}
	}

	/// Unregisters and stops every link. Links can no longer be added afterwards. Calling this
	/// again is a no-op.
	pub fn stop(&self) {
		if self.stopped.swap(true, Ordering::AcqRel) {
			return;
		}
		let links: Vec<Arc<dyn ChannelLink>> = {
			let mut index = self.index.write().unwrap();
			index.short_to_id.clear();
			index.by_id.drain().map(|(_, link)| link).collect()
		};
		log_info!(self.logger, "Stopping switch with {} channels", links.len());
		for link in links {
			link.stop();
		}
		let parked = core::mem::take(&mut *self.parked_resolutions.lock().unwrap());
		for (channel_id, packets) in parked {
			log_warn!(
				self.logger,
				"Dropping {} parked resolutions for channel {} on stop",
				packets.len(),
				channel_id
			);
		}
	}
}

impl<I: Deref + Send + Sync, L: Deref + Send + Sync> PacketSwitch for Switch<I, L>
where
	I::Target: InvoiceDatabase,
	L::Target: Logger,
{
	fn forward(&self, packet: HtlcPacket) {
		Switch::forward(self, packet)
	}

	fn park_resolution(&self, channel_id: ChannelId, packet: HtlcPacket) {
		Switch::park_resolution(self, channel_id, packet)
	}

	fn peer_disconnected(&self, their_node_id: &PublicKey) {
		Switch::peer_disconnected(self, their_node_id)
	}
}
