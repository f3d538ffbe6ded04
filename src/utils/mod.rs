//! Shared utilities: address arithmetic and static IP argument parsing.

pub mod ip_utils;

pub use ip_utils::{first_usable, last_usable, next_ip, parse_ip_arg};
