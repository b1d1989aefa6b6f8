// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The HTLC forwarding core of a Lightning node.
//!
//! A [`Switch`] owns the set of active channel links, indexed by channel id and short channel id,
//! and routes HTLC updates between them. Each link processes its updates on its own worker
//! thread, so handing a packet to a link never blocks on the commitment protocol or the network.
//!
//! The channel commitment state machine, the peer transport, onion decryption and invoice
//! storage are all external; this crate only depends on them through the [`ChannelLink`],
//! [`Peer`] and [`InvoiceDatabase`] traits.
//!
//! [`Switch`]: crate::ln::switch::Switch
//! [`ChannelLink`]: crate::ln::interfaces::ChannelLink
//! [`Peer`]: crate::ln::interfaces::Peer
//! [`InvoiceDatabase`]: crate::ln::interfaces::InvoiceDatabase

#![cfg_attr(not(test), warn(missing_docs))]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![forbid(unsafe_code)]

extern crate bitcoin;
#[cfg(test)]
extern crate regex;

#[macro_use]
pub mod util;
pub mod ln;

pub(crate) mod sync;

mod prelude {
	#[allow(unused_imports)]
	pub use std::{boxed::Box, string::String, string::ToString, vec, vec::Vec};

	#[allow(unused_imports)]
	pub use std::collections::{hash_map, HashMap, HashSet, VecDeque};
}
