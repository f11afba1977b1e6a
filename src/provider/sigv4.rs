//! AWS-SigV4-style request signing for the provisioning API.
//!
//! Only what the provider needs: GET requests with an empty payload, signed
//! headers `host;x-amz-date`, credential scope over the provider's
//! region/service pair.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-date";

pub struct Credentials<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

/// Sorted, RFC 3986-encoded query string; used verbatim both in the request
/// URL and in the canonical request.
pub fn canonical_query(params: &[(&str, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns the `x-amz-date` value and the `Authorization` header for a GET.
pub fn sign_get(
    host: &str,
    path: &str,
    query: &str,
    region: &str,
    service: &str,
    when: DateTime<Utc>,
    creds: &Credentials<'_>,
) -> (String, String) {
    let amz_date = when.format("%Y%m%dT%H%M%SZ").to_string();
    let datestamp = when.format("%Y%m%d").to_string();

    let payload_hash = hex_sha256(b"");
    let canonical_headers = format!("host:{host}\nx-amz-date:{amz_date}\n");
    let canonical_request = format!(
        "GET\n{path}\n{query}\n{canonical_headers}\n{SIGNED_HEADERS}\n{payload_hash}"
    );

    let scope = format!("{datestamp}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let k_date = hmac(format!("AWS4{}", creds.secret_key).as_bytes(), &datestamp);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, service);
    let k_signing = hmac(&k_service, "aws4_request");
    let signature = hex::encode(hmac(&k_signing, &string_to_sign));

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        creds.access_key
    );
    (amz_date, authorization)
}

fn hmac(key: &[u8], msg: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Known-answer vector: canonical request built from these inputs hashes
    // and signs to this exact Authorization header.
    #[test]
    fn signs_known_vector() {
        let creds = Credentials {
            access_key: "AKIDEXAMPLE",
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
        };
        let params = [
            ("uuid", "c0ffee00-1111-2222-3333-444455556666".to_string()),
            ("profileid", "1234".to_string()),
            ("regionid", "ABCD12".to_string()),
        ];
        let query = canonical_query(&params);
        assert_eq!(
            query,
            "profileid=1234&regionid=ABCD12&uuid=c0ffee00-1111-2222-3333-444455556666"
        );

        let when = Utc.with_ymd_and_hms(2026, 8, 2, 12, 30, 45).unwrap();
        let (amz_date, authorization) = sign_get(
            "api.example.test",
            "/cfp/v1/server/allocate",
            &query,
            "eu-west-1",
            "cf",
            when,
            &creds,
        );
        assert_eq!(amz_date, "20260802T123045Z");
        assert_eq!(
            authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260802/eu-west-1/cf/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=43b524d302396ca8be0132cfdf13d0873c8d1f13fceb91a80efd3057a61f64a5"
        );
    }

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
        assert_eq!(uri_encode("safe-._~123"), "safe-._~123");
    }
}
