//! Allow-list rules shared by the DNS responder and the TCP proxy

mod suffix;

pub use suffix::SuffixMatcher;
