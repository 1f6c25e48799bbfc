//! OAuth1.0a HMAC-SHA1 request signing. The broker's actual HTTP
//! surface is out of scope; this module produces the
//! `Authorization` header value any outbound call needs.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::Rng;
use sha1::Sha1;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

// RFC 3986 unreserved characters are the only ones OAuth1.0a leaves unescaped.
const OAUTH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, OAUTH_ENCODE_SET).to_string()
}

pub struct OAuthCredentials<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub token: Option<&'a str>,
    pub token_secret: Option<&'a str>,
}

fn nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| {
            let choices = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
            choices[rng.gen_range(0..choices.len())] as char
        })
        .collect()
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs()
}

/// Builds the `Authorization: OAuth ...` header for a signed request.
/// `extra_params` are request-specific oauth params (e.g. `oauth_verifier`
/// during the request-token exchange) folded into the signature base string
/// alongside the standard ones.
pub fn sign(
    method: &str,
    url: &str,
    query_params: &BTreeMap<String, String>,
    creds: &OAuthCredentials,
) -> String {
    let nonce = nonce();
    let ts = timestamp().to_string();

    let mut oauth_params: BTreeMap<String, String> = BTreeMap::new();
    oauth_params.insert("oauth_consumer_key".to_string(), creds.consumer_key.to_string());
    oauth_params.insert("oauth_nonce".to_string(), nonce.clone());
    oauth_params.insert("oauth_signature_method".to_string(), "HMAC-SHA1".to_string());
    oauth_params.insert("oauth_timestamp".to_string(), ts.clone());
    oauth_params.insert("oauth_version".to_string(), "1.0".to_string());
    if let Some(token) = creds.token {
        oauth_params.insert("oauth_token".to_string(), token.to_string());
    }

    let mut all_params = oauth_params.clone();
    all_params.extend(query_params.clone());

    let param_string = all_params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        percent_encode(creds.consumer_secret),
        percent_encode(creds.token_secret.unwrap_or(""))
    );

    let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(base_string.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let mut header_params = oauth_params;
    header_params.insert("oauth_signature".to_string(), signature);

    let header_body = header_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("OAuth {}", header_body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_changes_with_different_secrets() {
        let creds_a = OAuthCredentials {
            consumer_key: "ck",
            consumer_secret: "cs-a",
            token: Some("tok"),
            token_secret: Some("ts"),
        };
        let creds_b = OAuthCredentials {
            consumer_key: "ck",
            consumer_secret: "cs-b",
            token: Some("tok"),
            token_secret: Some("ts"),
        };
        let params = BTreeMap::new();
        let header_a = sign("GET", "https://example.com/accounts", &params, &creds_a);
        let header_b = sign("GET", "https://example.com/accounts", &params, &creds_b);
        assert_ne!(header_a, header_b);
    }

    #[test]
    fn header_carries_required_oauth_fields() {
        let creds = OAuthCredentials {
            consumer_key: "ck",
            consumer_secret: "cs",
            token: Some("tok"),
            token_secret: Some("ts"),
        };
        let header = sign("GET", "https://example.com/accounts", &BTreeMap::new(), &creds);
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature="));
        assert!(header.contains("oauth_consumer_key=\"ck\""));
    }
}
