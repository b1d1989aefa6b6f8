// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A bunch of useful utilities for building networks of nodes and exchanging messages between
//! them for tests.

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{OutPoint, Txid};

use crate::ln::interfaces::{ChannelLink, PacketSwitch, Peer};
use crate::ln::invoices::InvoiceRegistry;
use crate::ln::link::Link;
use crate::ln::msgs::{HopPayload, OnionPacket};
use crate::ln::switch::Switch;
use crate::ln::types::{PaymentHash, PaymentPreimage};
use crate::util::config::LinkConfig;
use crate::util::events::Event;
use crate::util::scid_utils::scid_from_parts;
use crate::util::test_utils::{pubkey, TestLogger, TestPeer};

use crate::prelude::*;
use crate::sync::{Arc, Mutex, Weak};

use std::time::{Duration, Instant};

/// Polls `$cond` until it holds, panicking if it doesn't within a few seconds. Links process
/// updates on their own threads so tests can't check their effects synchronously.
macro_rules! wait_for {
	($cond: expr) => {{
		let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
		while !($cond) {
			assert!(
				std::time::Instant::now() < deadline,
				"Timed out waiting for {}",
				stringify!($cond)
			);
			std::thread::sleep(std::time::Duration::from_millis(1));
		}
	}};
}

pub fn scid(n: u8) -> u64 {
	scid_from_parts(700_000 + n as u64, n as u64, 1).unwrap()
}

pub fn test_outpoint(n: u8) -> OutPoint {
	OutPoint { txid: Txid::from_byte_array([n; 32]), vout: n as u32 }
}

pub fn preimage_for(n: u8) -> PaymentPreimage {
	PaymentPreimage([n; 32])
}

pub fn payment_hash_for(n: u8) -> PaymentHash {
	PaymentHash::from(preimage_for(n))
}

pub type TestSwitch = Switch<Arc<InvoiceRegistry>, Arc<TestLogger>>;
pub type TestChannelLink = Link<Arc<TestLogger>>;

pub struct Node {
	/// Seed of the node id, used to build [`TestPeer`]s pointing at this node.
	pub node_seed: u8,
	pub node_id: PublicKey,
	pub switch: Arc<TestSwitch>,
	pub invoices: Arc<InvoiceRegistry>,
	pub logger: Arc<TestLogger>,
	pub events: Mutex<Vec<Event>>,
}

impl Node {
	/// Moves newly generated events to [`Node::events`] and returns how many there are in total.
	pub fn collect_events(&self) -> usize {
		let mut events = self.events.lock().unwrap();
		events.extend(self.switch.get_and_clear_pending_events());
		events.len()
	}

	/// Waits until `count` events were generated and takes them.
	pub fn wait_for_events(&self, count: usize) -> Vec<Event> {
		wait_for!(self.collect_events() >= count);
		core::mem::take(&mut *self.events.lock().unwrap())
	}
}

impl Drop for Node {
	fn drop(&mut self) {
		// Links hold the switch, so this is what breaks the cycle.
		self.switch.stop();
	}
}

pub fn create_network(node_count: u8) -> Vec<Node> {
	(0..node_count)
		.map(|i| {
			let invoices = Arc::new(InvoiceRegistry::new());
			let logger = Arc::new(TestLogger::with_id(format!("node {}", i)));
			Node {
				node_seed: i + 1,
				node_id: pubkey(i + 1),
				switch: Arc::new(Switch::new(Arc::clone(&invoices), Arc::clone(&logger))),
				invoices,
				logger,
				events: Mutex::new(Vec::new()),
			}
		})
		.collect()
}

/// Both sides of a channel: the link and the peer handle each node uses for it.
pub struct ChannelPair {
	pub a: Arc<TestChannelLink>,
	pub a_peer: Arc<TestPeer>,
	pub b: Arc<TestChannelLink>,
	pub b_peer: Arc<TestPeer>,
}

/// Builds a link on each of `node_a` and `node_b` for channel `n` and wires their peers to
/// each other, without registering the links.
pub fn create_unregistered_chan(
	node_a: &Node, node_b: &Node, n: u8, capacity_msat: u64, config: LinkConfig,
) -> ChannelPair {
	let make_link = |node: &Node, counterparty: &Node| {
		let peer = Arc::new(TestPeer::new(counterparty.node_seed));
		let link = Arc::new(Link::new(
			test_outpoint(n),
			scid(n),
			capacity_msat,
			config,
			Arc::clone(&peer) as Arc<dyn Peer>,
			Arc::clone(&node.switch) as Arc<dyn PacketSwitch>,
			Arc::clone(&node.logger),
		));
		(link, peer)
	};
	let (a, a_peer) = make_link(node_a, node_b);
	let (b, b_peer) = make_link(node_b, node_a);
	a_peer.connect_to(Arc::downgrade(&b) as Weak<dyn ChannelLink>);
	b_peer.connect_to(Arc::downgrade(&a) as Weak<dyn ChannelLink>);
	ChannelPair { a, a_peer, b, b_peer }
}

/// Opens channel `n` between `node_a` and `node_b` and waits for both sides to be able to
/// forward.
pub fn create_chan_between_nodes_with_value(
	node_a: &Node, node_b: &Node, n: u8, capacity_msat: u64,
) -> ChannelPair {
	create_chan_between_nodes_with_config(node_a, node_b, n, capacity_msat, LinkConfig::default())
}

pub fn create_chan_between_nodes_with_config(
	node_a: &Node, node_b: &Node, n: u8, capacity_msat: u64, config: LinkConfig,
) -> ChannelPair {
	let chan = create_unregistered_chan(node_a, node_b, n, capacity_msat, config);
	node_a.switch.add_link(Arc::clone(&chan.a) as Arc<dyn ChannelLink>).unwrap();
	node_b.switch.add_link(Arc::clone(&chan.b) as Arc<dyn ChannelLink>).unwrap();
	wait_for!(chan.a.eligible_to_forward() && chan.b.eligible_to_forward());
	chan
}

/// Builds the onion for a payment of `amount_msat` along `path`, a list of the short channel ids
/// to take after the first hop. Every hop charges `fee_per_hop_msat` and `cltv_delta_per_hop`
/// blocks.
///
/// Returns the amount and expiry to send to the first hop together with the onion.
pub fn build_onion(
	path: &[u64], amount_msat: u64, final_cltv: u32, fee_per_hop_msat: u64, cltv_delta_per_hop: u32,
) -> (u64, u32, OnionPacket) {
	let mut hops = vec![HopPayload { short_channel_id: 0, amt_to_forward: amount_msat, outgoing_cltv_value: final_cltv }];
	let mut amount = amount_msat;
	let mut cltv = final_cltv;
	for short_channel_id in path.iter().rev() {
		hops.insert(0, HopPayload { short_channel_id: *short_channel_id, amt_to_forward: amount, outgoing_cltv_value: cltv });
		amount += fee_per_hop_msat;
		cltv += cltv_delta_per_hop;
	}
	(amount, cltv, OnionPacket::new(hops))
}

/// Sends a payment from `origin` over `first_hop_scid` and then along `path`, paying each
/// intermediate hop a flat 10 sat and 72 blocks, which covers the default policy for amounts up
/// to 9,000,000 sat.
pub fn send_along_route(
	origin: &Node, first_hop_scid: u64, path: &[u64], amount_msat: u64, payment_hash: PaymentHash,
) -> u64 {
	let (first_amount, first_cltv, onion) = build_onion(path, amount_msat, 500, 10_000, 72);
	origin.switch.send_htlc(first_hop_scid, first_amount, payment_hash, first_cltv, onion)
}

/// Waits until no node has an open circuit left.
pub fn wait_for_circuits_closed(nodes: &[Node]) {
	let deadline = Instant::now() + Duration::from_secs(10);
	while nodes.iter().any(|node| node.switch.pending_circuit_count() != 0) {
		assert!(Instant::now() < deadline, "Timed out waiting for circuits to close");
		std::thread::sleep(Duration::from_millis(1));
	}
}

macro_rules! expect_payment_sent {
	($node: expr, $payment_id: expr, $preimage: expr) => {
		match &$node.wait_for_events(1)[..] {
			[$crate::util::events::Event::PaymentSent { payment_id, payment_preimage, .. }] => {
				assert_eq!(*payment_id, $payment_id);
				assert_eq!(*payment_preimage, $preimage);
			},
			events => panic!("Unexpected events {:?}", events),
		}
	};
}

macro_rules! expect_payment_failed {
	($node: expr, $payment_id: expr, $failure_code: expr) => {
		match &$node.wait_for_events(1)[..] {
			[$crate::util::events::Event::PaymentFailed { payment_id, failure_code, .. }] => {
				assert_eq!(*payment_id, $payment_id);
				assert_eq!(*failure_code, $failure_code);
			},
			events => panic!("Unexpected events {:?}", events),
		}
	};
}
