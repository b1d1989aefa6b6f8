// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::OutPoint;

use crate::ln::channel_id::ChannelId;
use crate::ln::functional_test_utils::{scid, test_outpoint};
use crate::ln::interfaces::{ChannelLink, LinkState, LinkStats, PacketSwitch, Peer};
use crate::ln::msgs::{Message, UpdateAddHTLC, UpdateFailHTLC, UpdateFulfillHTLC};
use crate::ln::packet::HtlcPacket;
use crate::ln::types::PaymentHash;
use crate::util::config::ForwardingPolicy;
use crate::util::errors::{APIError, PeerError};
use crate::util::logger::{Level, Logger, Record};

use crate::prelude::*;
use crate::sync::{Arc, Condvar, Mutex, Weak};

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub struct TestRecord {
	pub level: Level,
	pub channel_id: Option<ChannelId>,
	pub payment_hash: Option<PaymentHash>,
	pub display: String,
}

pub struct TestLogger {
	level: Level,
	id: String,
	pub lines: Mutex<HashMap<(String, String), usize>>,
	pub records: Mutex<Vec<TestRecord>>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		Self::with_id("".to_owned())
	}
	pub fn with_id(id: String) -> TestLogger {
		TestLogger {
			level: Level::Trace,
			id,
			lines: Mutex::new(HashMap::new()),
			records: Mutex::new(Vec::new()),
		}
	}

	/// Search for the number of occurrence of the logged lines which
	/// 1. belongs to the specified module and
	/// 2. contains `line` in it.
	/// And asserts if the number of occurrences is the same with the given `count`
	pub fn assert_log_contains(&self, module: &str, line: &str, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries
			.iter()
			.filter(|&(&(ref m, ref l), _c)| m == module && l.contains(line))
			.map(|(_, c)| c)
			.sum();
		assert_eq!(l, count)
	}

	/// Search for the number of occurrences of logged lines which
	/// 1. belong to the specified module and
	/// 2. match the given regex pattern.
	/// Assert that the number of occurrences equals the given `count`
	pub fn assert_log_regex(&self, module: &str, pattern: regex::Regex, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries
			.iter()
			.filter(|&(&(ref m, ref l), _c)| m == module && pattern.is_match(&l))
			.map(|(_, c)| c)
			.sum();
		assert_eq!(l, count)
	}
}

impl Logger for TestLogger {
	fn log(&self, record: Record) {
		*self
			.lines
			.lock()
			.unwrap()
			.entry((record.module_path.to_string(), format!("{}", record.args)))
			.or_insert(0) += 1;
		if record.level >= self.level {
			println!("{} {}", self.id, record);
		}
		self.records.lock().unwrap().push(TestRecord {
			level: record.level,
			channel_id: record.channel_id,
			payment_hash: record.payment_hash,
			display: record.to_string(),
		});
	}
}

pub fn pubkey(n: u8) -> PublicKey {
	let secp_ctx = Secp256k1::signing_only();
	PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[n; 32]).unwrap())
}

/// A [`Peer`] which records what it is sent and, if connected to a link on the other side,
/// delivers it there.
pub struct TestPeer {
	node_id: PublicKey,
	sent: Mutex<Vec<Message>>,
	wiped: Mutex<Vec<OutPoint>>,
	disconnected: AtomicBool,
	pub disconnect_reasons: Mutex<Vec<String>>,
	counterparty: Mutex<Option<Weak<dyn ChannelLink>>>,
	sends_held: Mutex<bool>,
	sends_released: Condvar,
	held_sends: AtomicUsize,
}

impl TestPeer {
	/// A peer whose node id is derived from `n`, which must be non-zero.
	pub fn new(n: u8) -> Self {
		TestPeer {
			node_id: pubkey(n),
			sent: Mutex::new(Vec::new()),
			wiped: Mutex::new(Vec::new()),
			disconnected: AtomicBool::new(false),
			disconnect_reasons: Mutex::new(Vec::new()),
			counterparty: Mutex::new(None),
			sends_held: Mutex::new(false),
			sends_released: Condvar::new(),
			held_sends: AtomicUsize::new(0),
		}
	}

	/// Makes every following `send_message` block until [`TestPeer::release_sends`].
	pub fn hold_sends(&self) {
		*self.sends_held.lock().unwrap() = true;
	}

	pub fn release_sends(&self) {
		*self.sends_held.lock().unwrap() = false;
		self.sends_released.notify_all();
	}

	/// The number of senders currently blocked by [`TestPeer::hold_sends`].
	pub fn held_sends(&self) -> usize {
		self.held_sends.load(Ordering::Acquire)
	}

	pub fn connect_to(&self, link: Weak<dyn ChannelLink>) {
		*self.counterparty.lock().unwrap() = Some(link);
	}

	pub fn is_disconnected(&self) -> bool {
		self.disconnected.load(Ordering::Acquire)
	}

	pub fn sent_messages(&self) -> Vec<Message> {
		self.sent.lock().unwrap().clone()
	}

	pub fn sent_adds(&self) -> Vec<UpdateAddHTLC> {
		self.sent_messages()
			.into_iter()
			.filter_map(|msg| match msg {
				Message::UpdateAddHTLC(msg) => Some(msg),
				_ => None,
			})
			.collect()
	}

	pub fn sent_fulfills(&self) -> Vec<UpdateFulfillHTLC> {
		self.sent_messages()
			.into_iter()
			.filter_map(|msg| match msg {
				Message::UpdateFulfillHTLC(msg) => Some(msg),
				_ => None,
			})
			.collect()
	}

	pub fn sent_fails(&self) -> Vec<UpdateFailHTLC> {
		self.sent_messages()
			.into_iter()
			.filter_map(|msg| match msg {
				Message::UpdateFailHTLC(msg) => Some(msg),
				_ => None,
			})
			.collect()
	}

	pub fn wiped_channels(&self) -> Vec<OutPoint> {
		self.wiped.lock().unwrap().clone()
	}
}

impl Peer for TestPeer {
	fn send_message(&self, msg: Message) -> Result<(), PeerError> {
		{
			let mut held = self.sends_held.lock().unwrap();
			if *held {
				self.held_sends.fetch_add(1, Ordering::AcqRel);
				while *held {
					held = self.sends_released.wait(held).unwrap();
				}
				self.held_sends.fetch_sub(1, Ordering::AcqRel);
			}
		}
		if self.is_disconnected() {
			return Err(PeerError::Disconnected);
		}
		self.sent.lock().unwrap().push(msg.clone());
		let counterparty = self.counterparty.lock().unwrap().as_ref().and_then(|link| link.upgrade());
		if let Some(link) = counterparty {
			link.handle_channel_update(msg);
		}
		Ok(())
	}

	fn wipe_channel(&self, funding_outpoint: &OutPoint) -> Result<(), PeerError> {
		self.wiped.lock().unwrap().push(*funding_outpoint);
		Ok(())
	}

	fn pub_key(&self) -> PublicKey {
		self.node_id
	}

	fn disconnect(&self, reason: &str) {
		self.disconnected.store(true, Ordering::Release);
		self.disconnect_reasons.lock().unwrap().push(reason.to_owned());
	}
}

/// A [`ChannelLink`] which processes nothing, it just records what it is handed.
pub struct TestLink {
	channel_id: ChannelId,
	short_channel_id: AtomicU64,
	capacity_msat: u64,
	policy: Mutex<ForwardingPolicy>,
	eligible: AtomicBool,
	state: Mutex<LinkState>,
	packets: Mutex<Vec<HtlcPacket>>,
	pub messages: Mutex<Vec<Message>>,
	peer: Arc<TestPeer>,
	stop_count: AtomicUsize,
	restored: Mutex<Vec<(u64, u64)>>,
}

impl TestLink {
	pub fn new(n: u8, capacity_msat: u64) -> Self {
		Self::with_scid(n, scid(n), capacity_msat)
	}

	pub fn with_scid(n: u8, short_channel_id: u64, capacity_msat: u64) -> Self {
		TestLink {
			channel_id: ChannelId::v1_from_funding_outpoint(test_outpoint(n)),
			short_channel_id: AtomicU64::new(short_channel_id),
			capacity_msat,
			policy: Mutex::new(ForwardingPolicy::default()),
			eligible: AtomicBool::new(true),
			state: Mutex::new(LinkState::Created),
			packets: Mutex::new(Vec::new()),
			messages: Mutex::new(Vec::new()),
			peer: Arc::new(TestPeer::new(n)),
			stop_count: AtomicUsize::new(0),
			restored: Mutex::new(Vec::new()),
		}
	}

	pub fn set_eligible(&self, eligible: bool) {
		self.eligible.store(eligible, Ordering::Release);
	}

	pub fn take_packets(&self) -> Vec<HtlcPacket> {
		core::mem::take(&mut *self.packets.lock().unwrap())
	}

	pub fn stop_count(&self) -> usize {
		self.stop_count.load(Ordering::Acquire)
	}

	/// The `(htlc_id, amount_msat)` of every incoming HTLC the switch restored, in order.
	pub fn restored(&self) -> Vec<(u64, u64)> {
		self.restored.lock().unwrap().clone()
	}
}

impl ChannelLink for TestLink {
	fn handle_switch_packet(&self, packet: HtlcPacket) {
		self.packets.lock().unwrap().push(packet);
	}

	fn handle_channel_update(&self, msg: Message) {
		self.messages.lock().unwrap().push(msg);
	}

	fn restore_incoming_htlc(&self, htlc_id: u64, amount_msat: u64) {
		self.restored.lock().unwrap().push((htlc_id, amount_msat));
	}

	fn channel_id(&self) -> ChannelId {
		self.channel_id
	}

	fn short_channel_id(&self) -> u64 {
		self.short_channel_id.load(Ordering::Acquire)
	}

	fn update_short_chan_id(&self, short_channel_id: u64) {
		self.short_channel_id.store(short_channel_id, Ordering::Release);
	}

	fn update_forwarding_policy(&self, policy: ForwardingPolicy) {
		*self.policy.lock().unwrap() = policy;
	}

	fn forwarding_policy(&self) -> ForwardingPolicy {
		*self.policy.lock().unwrap()
	}

	fn bandwidth(&self) -> u64 {
		self.capacity_msat
	}

	fn stats(&self) -> LinkStats {
		LinkStats::default()
	}

	fn peer(&self) -> Arc<dyn Peer> {
		Arc::clone(&self.peer) as Arc<dyn Peer>
	}

	fn eligible_to_forward(&self) -> bool {
		self.state() == LinkState::Active && self.eligible.load(Ordering::Acquire)
	}

	fn state(&self) -> LinkState {
		*self.state.lock().unwrap()
	}

	fn start(&self) -> Result<(), APIError> {
		let mut state = self.state.lock().unwrap();
		if *state != LinkState::Created {
			return Err(APIError::APIMisuseError { err: "already started".to_owned() });
		}
		if self.capacity_msat == 0 {
			*state = LinkState::Stopped;
			return Err(APIError::ChannelUnavailable { err: "no capacity".to_owned() });
		}
		*state = LinkState::Active;
		Ok(())
	}

	fn stop(&self) {
		let mut state = self.state.lock().unwrap();
		if *state != LinkState::Stopped {
			*state = LinkState::Stopped;
			self.stop_count.fetch_add(1, Ordering::AcqRel);
		}
	}
}

/// A [`PacketSwitch`] which records what links hand it.
pub struct TestSwitch {
	forwarded: Mutex<Vec<HtlcPacket>>,
	parked: Mutex<Vec<(ChannelId, HtlcPacket)>>,
	disconnected_peers: Mutex<Vec<PublicKey>>,
}

impl TestSwitch {
	pub fn new() -> Self {
		TestSwitch {
			forwarded: Mutex::new(Vec::new()),
			parked: Mutex::new(Vec::new()),
			disconnected_peers: Mutex::new(Vec::new()),
		}
	}

	pub fn disconnected_peers(&self) -> Vec<PublicKey> {
		self.disconnected_peers.lock().unwrap().clone()
	}

	pub fn forwarded(&self) -> Vec<HtlcPacket> {
		self.forwarded.lock().unwrap().clone()
	}

	pub fn parked(&self) -> Vec<(ChannelId, HtlcPacket)> {
		self.parked.lock().unwrap().clone()
	}
}

impl PacketSwitch for TestSwitch {
	fn forward(&self, packet: HtlcPacket) {
		self.forwarded.lock().unwrap().push(packet);
	}

	fn park_resolution(&self, channel_id: ChannelId, packet: HtlcPacket) {
		self.parked.lock().unwrap().push((channel_id, packet));
	}

	fn peer_disconnected(&self, their_node_id: &PublicKey) {
		self.disconnected_peers.lock().unwrap().push(*their_node_id);
	}
}
