//! Component A: canonical serialisation, chained SHA-256, Merkle roots, MAC
//! signing (§4.1).

mod canonical;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{HubError, HubResult};
use crate::model::measurement::{Batch, Measurement, MeasurementInput};
use crate::model::genesis_hash;

pub use canonical::canonicalise_measurement;

type HmacSha256 = Hmac<Sha256>;

/// Canonicalises a record by fixed field ordering with lexicographic key
/// sort, separator-free, and fixed numeric rounding, hashes it with
/// SHA-256, chains it, computes Merkle roots over batches, and signs with
/// HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct ForensicHasher {
    key_id: String,
    signing_key: Option<Vec<u8>>,
}

impl ForensicHasher {
    pub fn new(key_id: impl Into<String>, signing_key: Option<Vec<u8>>) -> Self {
        Self { key_id: key_id.into(), signing_key }
    }

    /// `chain_hash(prev, record)`: produces the own-hash of a new
    /// measurement given its predecessor's own-hash.
    pub fn chain_hash(&self, previous_hash: &str, input: &MeasurementInput) -> HubResult<Measurement> {
        if input.vwc.is_nan() || !(0.0..=1.0).contains(&input.vwc) {
            return Err(HubError::invalid_input(format!("vwc {} out of [0,1]", input.vwc)));
        }
        if !(0.0..=1.0).contains(&input.signal_quality) {
            return Err(HubError::invalid_input(format!(
                "signal_quality {} out of [0,1]",
                input.signal_quality
            )));
        }

        let canonical = canonical::canonicalise_measurement(input, previous_hash)?;
        let own_hash = sha256_hex(canonical.as_bytes());
        let signature = self.sign(&own_hash);

        Ok(Measurement {
            sensor_id: input.sensor_id.clone(),
            depth_inches: input.depth_inches,
            timestamp: input.timestamp,
            vwc: round_to(input.vwc, 6),
            soil_temp_c: input.soil_temp_c.map(|t| round_to(t, 2)),
            water_potential: input.water_potential.map(|p| round_to(p, 4)),
            signal_quality: round_to(input.signal_quality, 4),
            previous_hash: previous_hash.to_string(),
            own_hash,
            signature,
        })
    }

    /// Chains every measurement in `inputs` sequentially starting from
    /// `previous_hash`, then computes the batch's Merkle root and binding
    /// batch-hash.
    pub fn hash_batch(
        &self,
        inputs: &[MeasurementInput],
        previous_hash: &str,
        previous_batch_hash: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> HubResult<Batch> {
        let mut measurements = Vec::with_capacity(inputs.len());
        let mut prev = previous_hash.to_string();
        for input in inputs {
            let m = self.chain_hash(&prev, input)?;
            prev = m.own_hash.clone();
            measurements.push(m);
        }

        let hashes: Vec<&str> = measurements.iter().map(|m| m.own_hash.as_str()).collect();
        let merkle_root = self.merkle_root(&hashes);

        let batch_hash = self.batch_hash(
            previous_batch_hash,
            measurements.first().map(|m| m.own_hash.as_str()),
            measurements.last().map(|m| m.own_hash.as_str()),
            &merkle_root,
            measurements.len(),
            timestamp,
        );

        Ok(Batch { measurements, merkle_root, previous_batch_hash: previous_batch_hash.to_string(), batch_hash, timestamp })
    }

    /// Merkle combination pairs left/right and duplicates the last element
    /// if odd; single-element reduces to that hash; empty reduces to the
    /// genesis hash.
    pub fn merkle_root(&self, hashes: &[&str]) -> String {
        if hashes.is_empty() {
            return genesis_hash();
        }
        if hashes.len() == 1 {
            return hashes[0].to_string();
        }

        let mut level: Vec<String> = hashes.iter().map(|h| h.to_string()).collect();
        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            let mut i = 0;
            while i < level.len() {
                let left = &level[i];
                let right = if i + 1 < level.len() { &level[i + 1] } else { left };
                let combined = format!("{}{}", left, right);
                next.push(sha256_hex(combined.as_bytes()));
                i += 2;
            }
            level = next;
        }
        level.into_iter().next().unwrap()
    }

    pub fn batch_hash(
        &self,
        previous_batch_hash: &str,
        first_own_hash: Option<&str>,
        last_own_hash: Option<&str>,
        merkle_root: &str,
        count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> String {
        let canonical = canonical::canonicalise_batch(
            previous_batch_hash,
            first_own_hash.unwrap_or(""),
            last_own_hash.unwrap_or(""),
            merkle_root,
            count,
            timestamp,
        );
        sha256_hex(canonical.as_bytes())
    }

    /// HMAC-SHA256 signature in `hmac:{key_id}:{hex}` form, or
    /// `unsigned:{key_id}` if no signing key was configured.
    pub fn sign(&self, hash_hex: &str) -> String {
        match &self.signing_key {
            Some(key) => {
                let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(hash_hex.as_bytes());
                let sig = hex::encode(mac.finalize().into_bytes());
                format!("hmac:{}:{}", self.key_id, sig)
            }
            None => format!("unsigned:{}", self.key_id),
        }
    }

    pub fn verify_signature(&self, hash_hex: &str, signature: &str) -> bool {
        match &self.signing_key {
            Some(_) => self.sign(hash_hex) == signature,
            None => signature == format!("unsigned:{}", self.key_id),
        }
    }

    /// Verification is total: it reports mismatches, it does not raise.
    /// Comparisons always use the full 64 hex-character digest.
    pub fn verify_chain(
        &self,
        measurements: &[Measurement],
        expected_first: &str,
        expected_last: &str,
    ) -> ChainVerification {
        let mut valid_count = 0usize;
        let mut computed_prev = expected_first.to_string();
        let mut chain_intact = true;

        for m in measurements {
            if m.previous_hash != computed_prev {
                chain_intact = false;
            }
            let input = MeasurementInput {
                sensor_id: m.sensor_id.clone(),
                depth_inches: m.depth_inches,
                timestamp: m.timestamp,
                vwc: m.vwc,
                soil_temp_c: m.soil_temp_c,
                water_potential: m.water_potential,
                signal_quality: m.signal_quality,
            };
            let recomputed = canonical::canonicalise_measurement(&input, &m.previous_hash)
                .ok()
                .map(|c| sha256_hex(c.as_bytes()));

            let hash_ok = recomputed.as_deref() == Some(m.own_hash.as_str());
            if hash_ok {
                valid_count += 1;
            } else {
                chain_intact = false;
            }
            computed_prev = m.own_hash.clone();
        }

        let computed_last = measurements.last().map(|m| m.own_hash.clone()).unwrap_or_else(|| expected_first.to_string());
        let ok = chain_intact && computed_last == expected_last;

        ChainVerification { ok, chain_length: measurements.len(), valid_count, computed_last }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainVerification {
    pub ok: bool,
    pub chain_length: usize,
    pub valid_count: usize,
    pub computed_last: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_input(vwc: f64) -> MeasurementInput {
        MeasurementInput {
            sensor_id: "B001".to_string(),
            depth_inches: 18,
            timestamp: Utc_ymd(2026, 1, 1),
            vwc,
            soil_temp_c: Some(18.456789),
            water_potential: None,
            signal_quality: 1.0,
        }
    }

    #[allow(non_snake_case)]
    fn Utc_ymd(y: i32, m: u32, d: u32) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn chain_hash_is_deterministic_across_calls() {
        let hasher = ForensicHasher::new("hub-key-1", None);
        let input = sample_input(0.2);
        let m1 = hasher.chain_hash(&genesis_hash(), &input).unwrap();
        let m2 = hasher.chain_hash(&genesis_hash(), &input).unwrap();
        assert_eq!(m1.own_hash, m2.own_hash);
        assert_eq!(m1.own_hash.len(), 64);
    }

    #[test]
    fn rejects_out_of_range_vwc() {
        let hasher = ForensicHasher::new("hub-key-1", None);
        let input = sample_input(1.5);
        assert!(hasher.chain_hash(&genesis_hash(), &input).is_err());
    }

    #[test]
    fn merkle_root_empty_is_genesis() {
        let hasher = ForensicHasher::new("hub-key-1", None);
        assert_eq!(hasher.merkle_root(&[]), genesis_hash());
    }

    #[test]
    fn merkle_root_single_is_itself() {
        let hasher = ForensicHasher::new("hub-key-1", None);
        assert_eq!(hasher.merkle_root(&["abc"]), "abc");
    }

    #[test]
    fn merkle_root_duplicates_last_when_odd() {
        let hasher = ForensicHasher::new("hub-key-1", None);
        let three = hasher.merkle_root(&["a", "b", "c"]);
        let four = hasher.merkle_root(&["a", "b", "c", "c"]);
        assert_eq!(three, four);
    }

    #[test]
    fn verify_chain_detects_tamper() {
        let hasher = ForensicHasher::new("hub-key-1", None);
        let mut m = hasher.chain_hash(&genesis_hash(), &sample_input(0.2)).unwrap();
        let result = hasher.verify_chain(&[m.clone()], &genesis_hash(), &m.own_hash);
        assert!(result.ok);
        assert_eq!(result.valid_count, 1);

        m.vwc = 0.99;
        let tampered = hasher.verify_chain(&[m.clone()], &genesis_hash(), &m.own_hash);
        assert!(!tampered.ok);
        assert_eq!(tampered.valid_count, 0);
    }

    #[test]
    fn unsigned_signature_round_trips() {
        let hasher = ForensicHasher::new("hub-key-1", None);
        let sig = hasher.sign("deadbeef");
        assert_eq!(sig, "unsigned:hub-key-1");
        assert!(hasher.verify_signature("deadbeef", &sig));
    }

    #[test]
    fn hmac_signature_verifies_and_rejects_wrong_hash() {
        let hasher = ForensicHasher::new("hub-key-1", Some(b"secret-key-material".to_vec()));
        let sig = hasher.sign("deadbeef");
        assert!(sig.starts_with("hmac:hub-key-1:"));
        assert!(hasher.verify_signature("deadbeef", &sig));
        assert!(!hasher.verify_signature("other-hash", &sig));
    }

    #[test]
    fn rounding_matches_field_specific_precision() {
        assert_eq!(round_to(0.123456789, 6), 0.123457);
        assert_eq!(round_to(18.456789, 2), 18.46);
    }
}
