//! Wire format for telemetry queries.
//!
//! Reports leave the client as ordinary DNS TXT queries. This module owns the
//! byte-exact mapping: the packet buffer primitives, the protocol subset a
//! telemetry exchange needs, and the query builder that neutralizes EDNS
//! Client Subnet.

/// Low-level buffer operations for DNS packet handling
pub mod buffer;

/// DNS protocol definitions and packet structures
pub mod protocol;

/// Report-to-query encoding
pub mod query;
