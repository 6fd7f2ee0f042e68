//! Demo lifecycle rules, input validation and password material.

use std::path::{Component, Path};

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::types::DemoStatus;

pub const MAX_NAME_LEN: usize = 120;
pub const MIN_PASSWORD_LEN: usize = 4;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const INDEX_FILE: &str = "index.html";

/// Public path prefix a demo is served under; also the injected `<base href>`.
pub fn demo_url(project_id: Uuid) -> String {
    format!("/demos/{project_id}/")
}

/// Check a lifecycle move against the transition table.
///
/// `current == None` means the project has no demo yet; the only legal first
/// state is `building`.
pub fn transition(
    current: Option<DemoStatus>,
    requested: DemoStatus,
) -> Result<DemoStatus, DomainError> {
    use DemoStatus::*;

    let allowed = match (current, requested) {
        (_, Building) => true,
        (Some(Building), Ready | Error) => true,
        (Some(Ready | Error), Disabled) => true,
        (Some(Disabled), Ready) => true,
        _ => false,
    };

    if allowed {
        Ok(requested)
    } else {
        Err(DomainError::InvalidTransition { current, requested })
    }
}

/// Statuses an administrator may request directly; the others are reached
/// only through deploy/upload outcomes.
pub fn is_manual_status(status: DemoStatus) -> bool {
    matches!(status, DemoStatus::Ready | DemoStatus::Disabled)
}

pub fn validate_name(raw: &str) -> Result<String, DomainError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("demo_name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "demo_name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Normalise a deploy `local_path` into a relative, forward-slash path that
/// cannot leave the demos root.
pub fn validate_local_path(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("local_path must not be empty"));
    }

    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    DomainError::validation("local_path must be valid UTF-8")
                })?;
                if part.starts_with('.') {
                    return Err(DomainError::validation(
                        "local_path must not reference hidden directories",
                    ));
                }
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DomainError::validation(
                    "local_path must be relative to the demos directory",
                ));
            }
        }
    }

    if parts.is_empty() {
        return Err(DomainError::validation("local_path must name a directory"));
    }

    Ok(parts.join("/"))
}

/// Upload directories are named after their project; a deploy may only
/// point into its own.
pub fn ensure_own_upload_dir(local_path: &str, project_id: Uuid) -> Result<(), DomainError> {
    let first = local_path.split('/').next().unwrap_or_default();
    match Uuid::parse_str(first) {
        Ok(owner) if owner != project_id => Err(DomainError::validation(
            "local_path points into another project's upload directory",
        )),
        _ => Ok(()),
    }
}

/// First claimed path that is equal to, inside, or a parent of `local_path`.
pub fn overlapping_path<'a>(local_path: &str, claimed: &'a [String]) -> Option<&'a str> {
    claimed
        .iter()
        .map(String::as_str)
        .find(|other| {
            path_segments(local_path)
                .zip(path_segments(other))
                .all(|(left, right)| left == right)
        })
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty() && *part != ".")
}

/// Salted SHA-256 password material stored on the demo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    pub salt: Vec<u8>,
    pub hash: Vec<u8>,
}

impl PasswordDigest {
    pub fn create(password: &str) -> Result<Self, DomainError> {
        let length = password.chars().count();
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&length) {
            return Err(DomainError::validation(format!(
                "password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
            )));
        }

        let salt = Uuid::new_v4().as_bytes().to_vec();
        let hash = salted_hash(&salt, password);
        Ok(Self { salt, hash })
    }

    pub fn verify(salt: &[u8], hash: &[u8], candidate: &str) -> bool {
        let computed = salted_hash(salt, candidate);
        computed.ct_eq(hash).into()
    }
}

fn salted_hash(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

/// Cookie value proving the viewer unlocked this demo. Derived from the
/// stored hash, so rotating or clearing the password invalidates it.
pub fn unlock_token(demo_id: Uuid, password_hash: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"vetrina-unlock:");
    hasher.update(demo_id.as_bytes());
    hasher.update(password_hash);
    hex::encode(hasher.finalize().to_vec())
}

pub fn verify_unlock_token(demo_id: Uuid, password_hash: &[u8], presented: &str) -> bool {
    let expected = unlock_token(demo_id, password_hash);
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

pub fn unlock_cookie_name(project_id: Uuid) -> String {
    format!("vetrina_demo_{}", project_id.simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_state_must_be_building() {
        assert_eq!(
            transition(None, DemoStatus::Building).expect("allowed"),
            DemoStatus::Building
        );
        for status in [DemoStatus::Ready, DemoStatus::Error, DemoStatus::Disabled] {
            assert!(transition(None, status).is_err());
        }
    }

    #[test]
    fn building_resolves_to_ready_or_error() {
        assert!(transition(Some(DemoStatus::Building), DemoStatus::Ready).is_ok());
        assert!(transition(Some(DemoStatus::Building), DemoStatus::Error).is_ok());
        assert!(transition(Some(DemoStatus::Building), DemoStatus::Disabled).is_err());
    }

    #[test]
    fn disabled_demo_can_only_be_reenabled_or_rebuilt() {
        assert!(transition(Some(DemoStatus::Disabled), DemoStatus::Ready).is_ok());
        assert!(transition(Some(DemoStatus::Disabled), DemoStatus::Building).is_ok());
        assert!(transition(Some(DemoStatus::Disabled), DemoStatus::Error).is_err());
        assert!(transition(Some(DemoStatus::Error), DemoStatus::Ready).is_err());
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = transition(Some(DemoStatus::Error), DemoStatus::Ready).expect_err("illegal");
        assert_eq!(err.to_string(), "demo cannot move from `error` to `ready`");
    }

    #[test]
    fn local_path_is_normalised() {
        assert_eq!(
            validate_local_path("./acme/out/").expect("valid"),
            "acme/out"
        );
    }

    #[test]
    fn local_path_cannot_escape_root() {
        for raw in ["../etc", "/var/www", "acme/../../secret", ".git", "", "./"] {
            assert!(validate_local_path(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn deploy_may_not_target_another_projects_upload_dir() {
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();

        assert!(ensure_own_upload_dir(&own.to_string(), own).is_ok());
        assert!(ensure_own_upload_dir("agency/site", own).is_ok());
        assert!(ensure_own_upload_dir(&other.to_string(), own).is_err());
        assert!(ensure_own_upload_dir(&format!("{other}/assets"), own).is_err());
    }

    #[test]
    fn overlapping_paths_are_detected_both_ways() {
        let claimed = vec!["agency/site".to_string(), "shared".to_string()];

        assert_eq!(overlapping_path("agency/site", &claimed), Some("agency/site"));
        assert_eq!(overlapping_path("agency/site/v2", &claimed), Some("agency/site"));
        assert_eq!(overlapping_path("agency", &claimed), Some("agency/site"));
        assert_eq!(overlapping_path("shared/inner", &claimed), Some("shared"));
        assert_eq!(overlapping_path("agency/sites", &claimed), None);
        assert_eq!(overlapping_path("sharedx", &claimed), None);
    }

    #[test]
    fn demo_name_is_trimmed_and_bounded() {
        assert_eq!(validate_name("  Launch  ").expect("valid"), "Launch");
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn password_digest_verifies_only_the_original() {
        let digest = PasswordDigest::create("open sesame").expect("valid password");
        assert!(PasswordDigest::verify(&digest.salt, &digest.hash, "open sesame"));
        assert!(!PasswordDigest::verify(&digest.salt, &digest.hash, "open sesame!"));
        assert!(PasswordDigest::create("abc").is_err());
    }

    #[test]
    fn unlock_token_is_bound_to_password_hash() {
        let demo_id = Uuid::new_v4();
        let first = PasswordDigest::create("first-pass").expect("valid");
        let second = PasswordDigest::create("second-pass").expect("valid");

        let token = unlock_token(demo_id, &first.hash);
        assert!(verify_unlock_token(demo_id, &first.hash, &token));
        assert!(!verify_unlock_token(demo_id, &second.hash, &token));
        assert!(!verify_unlock_token(Uuid::new_v4(), &first.hash, &token));
    }
}
