use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Reserved key holding the serialized list of record ids.
pub const INDEX_KEY: &str = "record_keys";

const RECORD_KEY_PREFIX: &str = "record_";
const ID_SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn record_key(id: &str) -> String {
    format!("{}{}", RECORD_KEY_PREFIX, id)
}

/// Lifecycle state of a record. `Pending` is the only non-terminal state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Pending,
    Analyzed,
    Flagged,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Analyzed => "analyzed",
            RecordStatus::Flagged => "flagged",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(RecordStatus::Pending),
            "analyzed" => Ok(RecordStatus::Analyzed),
            "flagged" => Ok(RecordStatus::Flagged),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// One food/symptom entry. Payloads are opaque and stored verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub encrypted_food: String,
    pub encrypted_symptoms: String,
    /// Seconds since the epoch, fixed at creation.
    pub timestamp: u64,
    pub owner: String,
    pub status: RecordStatus,
    pub potential_allergens: Vec<String>,
}

impl Record {
    pub fn pending(id: String, input: NewRecord, timestamp: u64) -> Self {
        Self {
            id,
            encrypted_food: input.food,
            encrypted_symptoms: input.symptoms,
            timestamp,
            owner: input.owner,
            status: RecordStatus::Pending,
            potential_allergens: Vec::new(),
        }
    }

    pub fn is_owned_by(&self, address: &str) -> bool {
        self.owner.eq_ignore_ascii_case(address)
    }
}

/// Caller input for a new record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub food: String,
    pub symptoms: String,
    pub owner: String,
    /// Free-form hint about when the meal happened. Not persisted.
    #[serde(default)]
    pub meal_time_hint: Option<String>,
}

// Persisted form. The id lives in the key, not the blob. A missing, null or
// empty status reads as pending; missing or null allergens read as none.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordBlob {
    food: String,
    symptoms: String,
    timestamp: u64,
    owner: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    potential_allergens: Option<Vec<String>>,
}

pub fn encode_record(record: &Record) -> serde_json::Result<Vec<u8>> {
    let blob = RecordBlob {
        food: record.encrypted_food.clone(),
        symptoms: record.encrypted_symptoms.clone(),
        timestamp: record.timestamp,
        owner: record.owner.clone(),
        status: Some(record.status.as_str().to_string()),
        potential_allergens: Some(record.potential_allergens.clone()),
    };
    serde_json::to_vec(&blob)
}

pub fn decode_record(id: &str, bytes: &[u8]) -> serde_json::Result<Record> {
    let blob: RecordBlob = serde_json::from_slice(bytes)?;
    let status = match blob.status.as_deref().map(str::trim) {
        None | Some("") => RecordStatus::Pending,
        Some(s) => s.parse().map_err(<serde_json::Error as serde::de::Error>::custom)?,
    };
    Ok(Record {
        id: id.to_string(),
        encrypted_food: blob.food,
        encrypted_symptoms: blob.symptoms,
        timestamp: blob.timestamp,
        owner: blob.owner,
        status,
        potential_allergens: blob.potential_allergens.unwrap_or_default(),
    })
}

/// `<unix millis>-<7 base36 chars>`
pub fn new_record_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}-{}", millis, suffix)
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            id: "1700000000000-abc1234".into(),
            encrypted_food: "FHE-ZWdncw==".into(),
            encrypted_symptoms: "FHE-aGl2ZXM=".into(),
            timestamp: 1_700_000_000,
            owner: "0xAbC".into(),
            status: RecordStatus::Flagged,
            potential_allergens: vec!["Dairy".into(), "Nuts".into()],
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let record = sample();
        let bytes = encode_record(&record).unwrap();
        assert_eq!(decode_record(&record.id, &bytes).unwrap(), record);
    }

    #[test]
    fn blob_uses_wire_field_names() {
        let bytes = encode_record(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["food"], "FHE-ZWdncw==");
        assert_eq!(value["status"], "flagged");
        assert_eq!(value["potentialAllergens"][1], "Nuts");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn missing_status_and_allergens_default_to_pending() {
        let raw = br#"{"food":"f","symptoms":"s","timestamp":5,"owner":"0x1"}"#;
        let record = decode_record("x", raw).unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert!(record.potential_allergens.is_empty());
    }

    #[test]
    fn null_or_blank_fields_read_as_defaults() {
        let raw = br#"{"food":"f","symptoms":"s","timestamp":5,"owner":"0x1","status":null,"potentialAllergens":null}"#;
        let record = decode_record("x", raw).unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert!(record.potential_allergens.is_empty());

        let raw = br#"{"food":"f","symptoms":"s","timestamp":5,"owner":"0x1","status":""}"#;
        assert_eq!(decode_record("x", raw).unwrap().status, RecordStatus::Pending);
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let raw = br#"{"food":"f","symptoms":"s","timestamp":5,"owner":"0x1","status":"done"}"#;
        assert!(decode_record("x", raw).is_err());
    }

    #[test]
    fn ids_have_time_and_random_parts() {
        let a = new_record_id();
        let b = new_record_id();
        assert_ne!(a, b);
        let (millis, suffix) = a.split_once('-').unwrap();
        assert!(millis.parse::<u128>().is_ok());
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix.bytes().all(|c| BASE36.contains(&c)));
    }

    #[test]
    fn ownership_ignores_address_case() {
        assert!(sample().is_owned_by("0xabc"));
        assert!(!sample().is_owned_by("0xabd"));
    }
}
