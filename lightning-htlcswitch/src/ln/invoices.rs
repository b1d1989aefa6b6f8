// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! An in-memory [`InvoiceDatabase`].

use crate::ln::interfaces::{Invoice, InvoiceDatabase};
use crate::ln::types::{PaymentHash, PaymentPreimage};
use crate::util::errors::InvoiceError;

use crate::prelude::*;
use crate::sync::Mutex;

/// Keeps invoices in a map keyed by payment hash. Nothing is persisted.
pub struct InvoiceRegistry {
	invoices: Mutex<HashMap<PaymentHash, Invoice>>,
}

impl InvoiceRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		InvoiceRegistry { invoices: Mutex::new(HashMap::new()) }
	}

	/// Adds an unsettled invoice for `value_msat` which `payment_preimage` claims, returning its
	/// payment hash. Re-adding a known preimage leaves the existing invoice alone.
	pub fn add_invoice(&self, payment_preimage: PaymentPreimage, value_msat: u64) -> PaymentHash {
		let payment_hash = PaymentHash::from(payment_preimage);
		self.invoices
			.lock()
			.unwrap()
			.entry(payment_hash)
			.or_insert(Invoice { payment_preimage, value_msat, settled: false });
		payment_hash
	}
}

impl Default for InvoiceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl InvoiceDatabase for InvoiceRegistry {
	fn lookup_invoice(&self, payment_hash: &PaymentHash) -> Result<Invoice, InvoiceError> {
		self.invoices.lock().unwrap().get(payment_hash).copied().ok_or(InvoiceError::NotFound)
	}

	fn settle_invoice(&self, payment_hash: &PaymentHash) -> Result<(), InvoiceError> {
		let mut invoices = self.invoices.lock().unwrap();
		let invoice = invoices.get_mut(payment_hash).ok_or(InvoiceError::NotFound)?;
		if invoice.settled {
			return Err(InvoiceError::AlreadySettled);
		}
		invoice.settled = true;
		Ok(())
	}
}
