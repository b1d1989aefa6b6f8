// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The HTLC switch, channel links, and the types flowing between them live here.

#[cfg(test)]
#[macro_use]
pub(crate) mod functional_test_utils;

pub mod channel_id;
pub mod interfaces;
pub mod invoices;
pub mod link;
pub mod msgs;
pub mod packet;
pub mod switch;
pub mod types;

pub(crate) mod mailbox;

pub use self::channel_id::ChannelId;
pub use self::types::{PaymentHash, PaymentPreimage};
