//! Encoding of a report into a DNS query.
//!
//! A report travels as the name of an ordinary TXT query under the
//! collector's suffix. The query carries an EDNS Client Subnet option with a
//! zero-length prefix, instructing the recursive resolver not to reveal any
//! part of the client's address to the authoritative server (RFC 7871
//! section 7.1.2).

use derive_more::{Display, Error, From};

use crate::report::{Report, DATE_FORMAT};
use crate::wire::buffer::VectorPacketBuffer;
use crate::wire::protocol::{
    DnsPacket, DnsQuestion, DnsRecord, EdnsOption, ProtocolError, QueryType,
};

#[derive(Debug, Display, From, Error)]
pub enum QueryError {
    Protocol(ProtocolError),
    #[display(fmt = "report has no bin assignment")]
    MissingBin,
}

type Result<T> = std::result::Result<T, QueryError>;

/// Requested maximum UDP payload size, advertised through EDNS0.
const UDP_PAYLOAD_SIZE: u16 = 4096;

/// Encodes `report` as a query name under `suffix`, in the canonical label
/// order:
///
/// ```text
/// value_0 ... value_{k-1} . bin . country . YYYYMMDD . domain . suffix
/// ```
///
/// The collector's receiver inverts this encoding, so it must be
/// byte-identical on both sides.
pub fn encode_name(report: &Report, suffix: &str) -> Result<String> {
    let bin = report.bin.as_deref().ok_or(QueryError::MissingBin)?;

    let mut labels: Vec<&str> = report.values.iter().map(|v| v.as_str()).collect();
    let date = report.key.date.format(DATE_FORMAT).to_string();
    labels.push(bin);
    labels.push(&report.key.country);
    labels.push(&date);
    labels.push(&report.key.domain);
    labels.push(suffix);
    Ok(labels.join("."))
}

/// Returns a fully serialized DNS query for a TXT record at a name that
/// encodes `report` as a subdomain of `suffix`.
///
/// The query requests recursion and disables EDNS Client Subnet. DNSSEC OK is
/// left unset: the queried TXT record is known not to exist and the response
/// is not checked, so there is no reason to request signatures for it.
/// Serialization fails if any label exceeds the wire-format limits.
pub fn format_query(report: &Report, suffix: &str) -> Result<Vec<u8>> {
    let name = encode_name(report, suffix)?;

    let mut packet = DnsPacket::new();
    packet.header.recursion_desired = true;
    packet
        .questions
        .push(DnsQuestion::new(name, QueryType::Txt));
    packet.resources.push(DnsRecord::Opt {
        udp_payload_size: UDP_PAYLOAD_SIZE,
        flags: 0,
        options: vec![EdnsOption::client_subnet_disabled()],
    });

    let mut buffer = VectorPacketBuffer::new();
    packet.write(&mut buffer)?;
    Ok(buffer.buffer)
}
