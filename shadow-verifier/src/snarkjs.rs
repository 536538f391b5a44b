//! snarkjs JSON encodings of Groth16 proofs and verifying keys.
//!
//! Coordinates are decimal strings. G1 points are `[x, y, z]` and G2 points
//! `[[x0, x1], [y0, y1], [z0, z1]]` with `x = x0 + x1·u`; `z` is `1` for a
//! finite point and `0` for the identity.

use ark_bn254::{Bn254, Fq, Fq2, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::{PrimeField, Zero};
use ark_groth16::{Proof, VerifyingKey};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::VerifierError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnarkjsProof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnarkjsVerifyingKey {
    pub protocol: String,
    pub curve: String,
    #[serde(rename = "nPublic")]
    pub n_public: usize,
    pub vk_alpha_1: Vec<String>,
    pub vk_beta_2: Vec<Vec<String>>,
    pub vk_gamma_2: Vec<Vec<String>>,
    pub vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    pub ic: Vec<Vec<String>>,
}

impl SnarkjsProof {
    pub fn to_proof(&self) -> Result<Proof<Bn254>, VerifierError> {
        if let Some(protocol) = &self.protocol {
            check_protocol(protocol)?;
        }
        if let Some(curve) = &self.curve {
            check_curve(curve)?;
        }
        Ok(Proof {
            a: parse_g1("pi_a", &self.pi_a)?,
            b: parse_g2("pi_b", &self.pi_b)?,
            c: parse_g1("pi_c", &self.pi_c)?,
        })
    }

    pub fn from_proof(proof: &Proof<Bn254>) -> Self {
        Self {
            pi_a: encode_g1(&proof.a),
            pi_b: encode_g2(&proof.b),
            pi_c: encode_g1(&proof.c),
            protocol: Some("groth16".into()),
            curve: Some("bn128".into()),
        }
    }
}

impl SnarkjsVerifyingKey {
    pub fn to_verifying_key(&self) -> Result<VerifyingKey<Bn254>, VerifierError> {
        check_protocol(&self.protocol)?;
        check_curve(&self.curve)?;
        if self.ic.len() != self.n_public + 1 {
            return Err(VerifierError::Malformed {
                field: "IC",
                reason: format!(
                    "expected {} points for nPublic = {}, got {}",
                    self.n_public + 1,
                    self.n_public,
                    self.ic.len()
                ),
            });
        }

        let gamma_abc_g1 = self
            .ic
            .iter()
            .map(|point| parse_g1("IC", point))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VerifyingKey {
            alpha_g1: parse_g1("vk_alpha_1", &self.vk_alpha_1)?,
            beta_g2: parse_g2("vk_beta_2", &self.vk_beta_2)?,
            gamma_g2: parse_g2("vk_gamma_2", &self.vk_gamma_2)?,
            delta_g2: parse_g2("vk_delta_2", &self.vk_delta_2)?,
            gamma_abc_g1,
        })
    }

    pub fn from_verifying_key(vk: &VerifyingKey<Bn254>) -> Self {
        Self {
            protocol: "groth16".into(),
            curve: "bn128".into(),
            n_public: vk.gamma_abc_g1.len().saturating_sub(1),
            vk_alpha_1: encode_g1(&vk.alpha_g1),
            vk_beta_2: encode_g2(&vk.beta_g2),
            vk_gamma_2: encode_g2(&vk.gamma_g2),
            vk_delta_2: encode_g2(&vk.delta_g2),
            ic: vk.gamma_abc_g1.iter().map(encode_g1).collect(),
        }
    }
}

fn check_protocol(protocol: &str) -> Result<(), VerifierError> {
    if protocol.eq_ignore_ascii_case("groth16") {
        Ok(())
    } else {
        Err(VerifierError::Protocol(protocol.to_string()))
    }
}

fn check_curve(curve: &str) -> Result<(), VerifierError> {
    match curve.to_ascii_lowercase().as_str() {
        "bn128" | "bn254" => Ok(()),
        _ => Err(VerifierError::Curve(curve.to_string())),
    }
}

fn parse_fq(field: &'static str, text: &str) -> Result<Fq, VerifierError> {
    let malformed = |reason: String| VerifierError::Malformed { field, reason };
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(malformed(format!("'{}' is not a decimal coordinate", text)));
    }
    let value = BigUint::parse_bytes(trimmed.as_bytes(), 10)
        .ok_or_else(|| malformed(format!("'{}' is not a decimal coordinate", text)))?;
    if value >= BigUint::from(Fq::MODULUS) {
        return Err(malformed("coordinate exceeds the base-field modulus".into()));
    }
    Ok(Fq::from_le_bytes_mod_order(&value.to_bytes_le()))
}

fn parse_g1(field: &'static str, coords: &[String]) -> Result<G1Affine, VerifierError> {
    if coords.len() < 2 || coords.len() > 3 {
        return Err(VerifierError::Malformed {
            field,
            reason: format!("expected 2 or 3 coordinates, got {}", coords.len()),
        });
    }
    if let Some(z) = coords.get(2) {
        match z.trim() {
            "0" => return Ok(G1Affine::zero()),
            "1" => {}
            other => {
                return Err(VerifierError::Malformed {
                    field,
                    reason: format!("non-normalised z coordinate '{}'", other),
                })
            }
        }
    }

    let point = G1Affine::new_unchecked(parse_fq(field, &coords[0])?, parse_fq(field, &coords[1])?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(VerifierError::NotOnCurve(field));
    }
    Ok(point)
}

fn parse_fq2(field: &'static str, pair: &[String]) -> Result<Fq2, VerifierError> {
    if pair.len() != 2 {
        return Err(VerifierError::Malformed {
            field,
            reason: format!("expected an Fq2 pair, got {} limbs", pair.len()),
        });
    }
    Ok(Fq2::new(parse_fq(field, &pair[0])?, parse_fq(field, &pair[1])?))
}

fn parse_g2(field: &'static str, coords: &[Vec<String>]) -> Result<G2Affine, VerifierError> {
    if coords.len() < 2 || coords.len() > 3 {
        return Err(VerifierError::Malformed {
            field,
            reason: format!("expected 2 or 3 coordinates, got {}", coords.len()),
        });
    }
    if let Some(z) = coords.get(2) {
        let z = parse_fq2(field, z)?;
        if z.is_zero() {
            return Ok(G2Affine::zero());
        }
        if z != Fq2::new(Fq::from(1u64), Fq::from(0u64)) {
            return Err(VerifierError::Malformed {
                field,
                reason: "non-normalised z coordinate".into(),
            });
        }
    }

    let point = G2Affine::new_unchecked(parse_fq2(field, &coords[0])?, parse_fq2(field, &coords[1])?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(VerifierError::NotOnCurve(field));
    }
    Ok(point)
}

fn fq_to_decimal(value: &Fq) -> String {
    BigUint::from(value.into_bigint()).to_string()
}

fn encode_g1(point: &G1Affine) -> Vec<String> {
    if point.is_zero() {
        return vec!["0".into(), "1".into(), "0".into()];
    }
    vec![fq_to_decimal(&point.x), fq_to_decimal(&point.y), "1".into()]
}

fn encode_g2(point: &G2Affine) -> Vec<Vec<String>> {
    if point.is_zero() {
        return vec![
            vec!["0".into(), "0".into()],
            vec!["1".into(), "0".into()],
            vec!["0".into(), "0".into()],
        ];
    }
    vec![
        vec![fq_to_decimal(&point.x.c0), fq_to_decimal(&point.x.c1)],
        vec![fq_to_decimal(&point.y.c0), fq_to_decimal(&point.y.c1)],
        vec!["1".into(), "0".into()],
    ]
}
