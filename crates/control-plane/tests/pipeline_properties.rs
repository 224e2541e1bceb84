//! Cross-module properties of the pipeline: signature correctness, push
//! gating, slug validity, and secret opacity at the API boundary.

use control_plane::models::MASKED_VALUE;
use control_plane::services::projects::{is_valid_slug, random_suffix, slugify};
use control_plane::webhooks::{sign, verify_signature, PushEvent};

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

fn push_body(ref_: &str, after: &str, deleted: bool) -> Vec<u8> {
    format!(
        r#"{{"ref":"{ref_}","after":"{after}","deleted":{deleted},
            "repository":{{"id":7,"name":"app","full_name":"dev/app","clone_url":"https://example.test/dev/app.git"}},
            "head_commit":{{"id":"{after}","message":"ship it","author":{{"name":"Dev","username":"dev"}}}},
            "pusher":{{"name":"dev"}}}}"#
    )
    .into_bytes()
}

#[test]
fn reference_signature_accepted_any_flip_rejected() {
    let secret = "0a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9";
    let body = push_body("refs/heads/main", &"c".repeat(40), false);
    let header = sign(&body, secret);
    assert!(verify_signature(&body, &header, secret).is_ok());

    for i in 0..body.len() {
        let mut tampered = body.clone();
        tampered[i] ^= 0x01;
        assert!(verify_signature(&tampered, &header, secret).is_err(), "byte {i} flip accepted");
    }
    assert!(verify_signature(&body, &header, "other-secret").is_err());
}

#[test]
fn gated_pushes_never_deploy() {
    let live = PushEvent::parse(&push_body("refs/heads/main", &"d".repeat(40), false)).unwrap();
    assert!(live.should_deploy());

    let deleted = PushEvent::parse(&push_body("refs/heads/main", &"d".repeat(40), true)).unwrap();
    assert!(!deleted.should_deploy());

    let zero = PushEvent::parse(&push_body("refs/heads/main", ZERO_SHA, false)).unwrap();
    assert!(!zero.should_deploy());
}

#[test]
fn branch_derivation_feeds_the_branch_gate() {
    let e = PushEvent::parse(&push_body("refs/heads/dev", &"e".repeat(40), false)).unwrap();
    assert_eq!(e.branch(), "dev");
    // the intake compares this against the project's configured branch
    assert_ne!(e.branch(), "main");
}

#[test]
fn every_allocated_slug_shape_is_valid() {
    for name in ["My App", "x", "A!!B", "app_2024", "  spaced  out  ", &"q".repeat(120)] {
        let slug = slugify(name);
        if !slug.is_empty() {
            assert!(is_valid_slug(&slug), "{name:?} -> {slug:?}");
        }
        let mut base = slug.clone();
        base.truncate(45);
        let base = base.trim_end_matches('-');
        if !base.is_empty() {
            let suffixed = format!("{base}-{}", random_suffix());
            assert!(is_valid_slug(&suffixed), "{suffixed:?}");
        }
    }
}

#[test]
fn masked_value_carries_no_cleartext() {
    assert_eq!(MASKED_VALUE.chars().count(), 8);
    assert!(MASKED_VALUE.chars().all(|c| c == '\u{2022}'));
}
