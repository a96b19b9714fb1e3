//! RFC 1035 DNS message construction and RFC 9460 HTTPS (type 65) RR parsing.
//!
//! No recursive resolution, no TCP fallback, no DNSSEC — a one-shot
//! query/parse pair, nothing more.

const HTTPS_RR_TYPE: u16 = 65;
const IN_CLASS: u16 = 1;
const ECH_SVCPARAM_KEY: u16 = 5;

/// Builds the raw DNS query bytes for an HTTPS-type (65) lookup of `domain`.
///
/// Header is fixed: ID=1, RD=1, QDCOUNT=1, everything else zero.
pub fn build_query(domain: &str) -> Vec<u8> {
	let mut buf = Vec::with_capacity(32);
	// ID = 1
	buf.extend_from_slice(&1u16.to_be_bytes());
	// flags: RD bit set (0x0100), QR/opcode/AA/TC/RA/Z/RCODE all zero
	buf.extend_from_slice(&0x0100u16.to_be_bytes());
	buf.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
	buf.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
	buf.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
	buf.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

	for label in domain.split('.') {
		if label.is_empty() {
			continue;
		}
		buf.push(label.len() as u8);
		buf.extend_from_slice(label.as_bytes());
	}
	buf.push(0); // root label

	buf.extend_from_slice(&HTTPS_RR_TYPE.to_be_bytes());
	buf.extend_from_slice(&IN_CLASS.to_be_bytes());
	buf
}

/// Skips a DNS name starting at `pos`, following label-length octets and the
/// 2-byte 0xC0 pointer-compression form. Returns the offset just past the name.
fn skip_name(buf: &[u8], mut pos: usize) -> Option<usize> {
	loop {
		let len = *buf.get(pos)?;
		if len == 0 {
			return Some(pos + 1);
		}
		if len & 0xC0 == 0xC0 {
			// 2-byte compression pointer; the name ends here regardless of target.
			buf.get(pos + 1)?;
			return Some(pos + 2);
		}
		pos += 1 + len as usize;
		if pos >= buf.len() {
			return None;
		}
	}
}

fn read_u16(buf: &[u8], pos: usize) -> Option<u16> {
	let b = buf.get(pos..pos + 2)?;
	Some(u16::from_be_bytes([b[0], b[1]]))
}

/// Parses a DNS response for an HTTPS RR, returning the `ech` (SvcParamKey 5)
/// value, base64-encoded, if present.
///
/// Any malformed-input condition (short header, ANCOUNT == 0, truncated
/// records, no matching SvcParam) returns `None` rather than an error — the
/// caller treats "no ECH" as a bootstrap failure, not a parse failure.
pub fn parse_https_answer(buf: &[u8]) -> Option<String> {
	if buf.len() < 12 {
		return None;
	}
	let ancount = read_u16(buf, 6)?;
	if ancount == 0 {
		return None;
	}

	// Skip the question: QNAME + QTYPE(2) + QCLASS(2).
	let mut pos = skip_name(buf, 12)?;
	pos += 4;

	for _ in 0..ancount {
		pos = skip_name(buf, pos)?;
		let rtype = read_u16(buf, pos)?;
		pos += 2;
		pos += 6; // CLASS(2) + TTL(4)
		let rdlength = read_u16(buf, pos)? as usize;
		pos += 2;
		let rdata = buf.get(pos..pos + rdlength)?;
		pos += rdlength;

		if rtype == HTTPS_RR_TYPE
			&& let Some(ech) = parse_https_rdata(rdata)
		{
			use base64::Engine;
			return Some(base64::engine::general_purpose::STANDARD.encode(ech));
		}
	}
	None
}

/// Parses the RDATA of a single HTTPS RR: SvcPriority(2), TargetName, then
/// SvcParam `{key:u16, len:u16, value[len]}` pairs. Returns the `ech` value.
fn parse_https_rdata(rdata: &[u8]) -> Option<Vec<u8>> {
	if rdata.len() < 2 {
		return None;
	}
	let mut pos = 2; // SvcPriority
	pos = skip_name(rdata, pos)?; // TargetName

	while pos + 4 <= rdata.len() {
		let key = read_u16(rdata, pos)?;
		let len = read_u16(rdata, pos + 2)? as usize;
		pos += 4;
		let value = rdata.get(pos..pos + len)?;
		pos += len;
		if key == ECH_SVCPARAM_KEY {
			return Some(value.to_vec());
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	fn encode_name(domain: &str) -> Vec<u8> {
		let mut out = Vec::new();
		for label in domain.split('.') {
			out.push(label.len() as u8);
			out.extend_from_slice(label.as_bytes());
		}
		out.push(0);
		out
	}

	/// Builds a synthetic DNS response with one HTTPS RR carrying the given
	/// `ech` SvcParam value, answering the query produced by `build_query`.
	fn synthetic_response(domain: &str, ech: &[u8]) -> Vec<u8> {
		let mut buf = Vec::new();
		buf.extend_from_slice(&1u16.to_be_bytes()); // ID
		buf.extend_from_slice(&0x8180u16.to_be_bytes()); // QR=1, RA=1
		buf.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
		buf.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
		buf.extend_from_slice(&0u16.to_be_bytes());
		buf.extend_from_slice(&0u16.to_be_bytes());

		buf.extend_from_slice(&encode_name(domain));
		buf.extend_from_slice(&65u16.to_be_bytes());
		buf.extend_from_slice(&1u16.to_be_bytes());

		// Answer: name (pointer to offset 12), TYPE=65, CLASS=1, TTL=300, RDLENGTH, RDATA
		buf.extend_from_slice(&[0xC0, 0x0C]);
		buf.extend_from_slice(&65u16.to_be_bytes());
		buf.extend_from_slice(&1u16.to_be_bytes());
		buf.extend_from_slice(&300u32.to_be_bytes());

		let mut rdata = Vec::new();
		rdata.extend_from_slice(&1u16.to_be_bytes()); // SvcPriority
		rdata.extend_from_slice(&encode_name("svc.example.com")); // TargetName (unused)
		// Unrelated SvcParam before the ech one, to exercise iteration.
		rdata.extend_from_slice(&4u16.to_be_bytes()); // key = alpn
		rdata.extend_from_slice(&2u16.to_be_bytes());
		rdata.extend_from_slice(b"h2");
		rdata.extend_from_slice(&5u16.to_be_bytes()); // key = ech
		rdata.extend_from_slice(&(ech.len() as u16).to_be_bytes());
		rdata.extend_from_slice(ech);

		buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
		buf.extend_from_slice(&rdata);
		buf
	}

	#[test]
	fn round_trip_yields_original_ech_bytes() {
		let query = build_query("cloudflare-ech.com");
		assert_eq!(&query[0..2], &[0, 1]); // ID = 1
		assert_eq!(&query[2..4], &[0x01, 0x00]); // RD set
		assert_eq!(&query[4..6], &[0, 1]); // QDCOUNT = 1

		let ech_bytes = b"\x00\x40\xfe\x0d\x00\x41example-ech-config".to_vec();
		let response = synthetic_response("cloudflare-ech.com", &ech_bytes);
		let parsed = parse_https_answer(&response).expect("ech config present");
		use base64::Engine;
		let decoded = base64::engine::general_purpose::STANDARD.decode(parsed).unwrap();
		assert_eq!(decoded, ech_bytes);
	}

	#[test]
	fn short_header_returns_none() {
		assert_eq!(parse_https_answer(&[0u8; 4]), None);
	}

	#[test]
	fn zero_answers_returns_none() {
		let mut buf = vec![0u8; 12];
		buf[6] = 0;
		buf[7] = 0;
		assert_eq!(parse_https_answer(&buf), None);
	}

	#[test]
	fn missing_ech_param_returns_none() {
		let mut buf = Vec::new();
		buf.extend_from_slice(&1u16.to_be_bytes());
		buf.extend_from_slice(&0x8180u16.to_be_bytes());
		buf.extend_from_slice(&1u16.to_be_bytes());
		buf.extend_from_slice(&1u16.to_be_bytes());
		buf.extend_from_slice(&0u16.to_be_bytes());
		buf.extend_from_slice(&0u16.to_be_bytes());
		buf.extend_from_slice(&encode_name("example.com"));
		buf.extend_from_slice(&65u16.to_be_bytes());
		buf.extend_from_slice(&1u16.to_be_bytes());
		buf.extend_from_slice(&[0xC0, 0x0C]);
		buf.extend_from_slice(&65u16.to_be_bytes());
		buf.extend_from_slice(&1u16.to_be_bytes());
		buf.extend_from_slice(&300u32.to_be_bytes());
		let mut rdata = Vec::new();
		rdata.extend_from_slice(&1u16.to_be_bytes());
		rdata.extend_from_slice(&encode_name("svc.example.com"));
		rdata.extend_from_slice(&4u16.to_be_bytes());
		rdata.extend_from_slice(&2u16.to_be_bytes());
		rdata.extend_from_slice(b"h2");
		buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
		buf.extend_from_slice(&rdata);
		assert_eq!(parse_https_answer(&buf), None);
	}
}
