//! Push event payload, deployment gating, and signature verification.
//!
//! Signature verification requires the byte-exact request body; the intake
//! handler reads the raw bytes before any JSON decoding.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing webhook signature")]
    Missing,
    #[error("invalid webhook signature")]
    Invalid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    /// e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    pub r#ref: String,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
    #[serde(default)]
    pub deleted: bool,
    pub repository: Repository,
    pub head_commit: Option<Commit>,
    #[serde(default)]
    pub pusher: Pusher,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub clone_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: Author,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pusher {
    #[serde(default)]
    pub name: String,
}

impl PushEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Branch name derived from the ref (`refs/heads/main` -> `main`).
    pub fn branch(&self) -> &str {
        self.r#ref.strip_prefix("refs/heads/").unwrap_or(&self.r#ref)
    }

    /// Gating: branch deletions, ref-only pushes without a head commit, and
    /// the all-zeros SHA never trigger a deployment.
    pub fn should_deploy(&self) -> bool {
        !self.deleted && self.head_commit.is_some() && self.after != ZERO_SHA
    }

    /// Commit details for the deployment record. The author falls back from
    /// commit author name to username to the pusher.
    pub fn commit_info(&self) -> (String, String, String) {
        let sha = self.after.clone();
        let (message, mut author) = match &self.head_commit {
            Some(c) => {
                let author = if c.author.name.is_empty() { c.author.username.clone() } else { c.author.name.clone() };
                (c.message.clone(), author)
            }
            None => (String::new(), String::new()),
        };
        if author.is_empty() {
            author = self.pusher.name.clone();
        }
        (sha, message, author)
    }
}

/// Verify a `sha256=<hex>` signature header against the raw body.
/// Comparison is constant time.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &str) -> Result<(), SignatureError> {
    if signature_header.is_empty() {
        return Err(SignatureError::Missing);
    }
    let hex_sig = signature_header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Invalid)?;
    let claimed = hex::decode(hex_sig).map_err(|_| SignatureError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Invalid)?;
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    if expected.ct_eq(claimed.as_slice()).into() {
        Ok(())
    } else {
        Err(SignatureError::Invalid)
    }
}

/// Reference signature for a payload, in header form. Used by tests and by
/// webhook rewiring diagnostics.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_json(ref_: &str, after: &str, deleted: bool, with_commit: bool) -> String {
        let head = if with_commit {
            format!(r#"{{"id":"{after}","message":"fix: things","author":{{"name":"Dev","username":"dev"}}}}"#)
        } else {
            "null".to_string()
        };
        format!(
            r#"{{"ref":"{ref_}","before":"{ZERO_SHA}","after":"{after}","deleted":{deleted},
                "repository":{{"id":1,"name":"app","full_name":"dev/app","clone_url":"https://example.test/dev/app.git"}},
                "head_commit":{head},"pusher":{{"name":"dev"}}}}"#
        )
    }

    #[test]
    fn branch_strips_refs_heads() {
        let e = PushEvent::parse(push_json("refs/heads/main", "a".repeat(40).as_str(), false, true).as_bytes()).unwrap();
        assert_eq!(e.branch(), "main");
    }

    #[test]
    fn gating_rejects_deleted_missing_commit_and_zero_sha() {
        let sha = "a".repeat(40);
        let ok = PushEvent::parse(push_json("refs/heads/main", &sha, false, true).as_bytes()).unwrap();
        assert!(ok.should_deploy());

        let deleted = PushEvent::parse(push_json("refs/heads/main", &sha, true, true).as_bytes()).unwrap();
        assert!(!deleted.should_deploy());

        let no_commit = PushEvent::parse(push_json("refs/heads/main", &sha, false, false).as_bytes()).unwrap();
        assert!(!no_commit.should_deploy());

        let zero = PushEvent::parse(push_json("refs/heads/main", ZERO_SHA, false, true).as_bytes()).unwrap();
        assert!(!zero.should_deploy());
    }

    #[test]
    fn commit_info_author_fallback() {
        let sha = "b".repeat(40);
        let mut e = PushEvent::parse(push_json("refs/heads/main", &sha, false, true).as_bytes()).unwrap();
        assert_eq!(e.commit_info(), (sha.clone(), "fix: things".into(), "Dev".into()));

        e.head_commit.as_mut().unwrap().author.name.clear();
        assert_eq!(e.commit_info().2, "dev");

        e.head_commit.as_mut().unwrap().author.username.clear();
        assert_eq!(e.commit_info().2, "dev"); // pusher
    }

    #[test]
    fn signature_accepts_reference_hmac() {
        let body = b"{\"hello\":\"world\"}";
        let header = sign(body, "secret");
        assert!(verify_signature(body, &header, "secret").is_ok());
    }

    #[test]
    fn signature_rejects_flipped_body_byte() {
        let body = b"{\"hello\":\"world\"}".to_vec();
        let header = sign(&body, "secret");
        let mut tampered = body.clone();
        *tampered.last_mut().unwrap() ^= 0x01;
        assert_eq!(verify_signature(&tampered, &header, "secret"), Err(SignatureError::Invalid));
    }

    #[test]
    fn signature_rejects_flipped_signature_byte() {
        let body = b"payload";
        let mut header = sign(body, "secret");
        let flipped = if header.ends_with('0') { '1' } else { '0' };
        header.pop();
        header.push(flipped);
        assert_eq!(verify_signature(body, &header, "secret"), Err(SignatureError::Invalid));
    }

    #[test]
    fn signature_missing_or_malformed() {
        assert_eq!(verify_signature(b"x", "", "s"), Err(SignatureError::Missing));
        assert_eq!(verify_signature(b"x", "md5=abc", "s"), Err(SignatureError::Invalid));
        assert_eq!(verify_signature(b"x", "sha256=nothex", "s"), Err(SignatureError::Invalid));
    }
}
