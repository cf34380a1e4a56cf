use std::time::{SystemTime, UNIX_EPOCH};

use pursuit_experiment::Demographics;
use sha2::{Digest, Sha256};

/// Eight hex characters of a SHA-256 over the intake time. Short enough for
/// the tracker's host file names (8.3).
pub fn participant_id(at: SystemTime) -> String {
    let nanos = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let digest = Sha256::digest(nanos.to_string().as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(8);
    id
}

pub fn demographics(
    age: Option<u32>,
    sex: Option<String>,
    eye_color: Option<String>,
    eye_condition: Option<String>,
) -> Demographics {
    let clean = |s: Option<String>| {
        s.map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
    };
    Demographics {
        age,
        sex: clean(sex),
        eye_color: clean(eye_color),
        eye_condition: clean(eye_condition),
    }
}
