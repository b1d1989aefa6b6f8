// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Some utility modules live here. See individual sub-modules for more info.

/// Logging macro utilities.
#[macro_use]
pub(crate) mod macro_logger;

pub mod errors;
pub mod events;
pub mod scid_utils;

pub(crate) mod atomic_counter;

// These have to come after macro_logger to build
pub mod config;
pub mod logger;

#[cfg(test)]
pub(crate) mod test_utils;
